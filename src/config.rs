// ABOUTME: Environment-based server configuration for deployment-specific settings
// ABOUTME: Every tunable comes from an environment variable with a safe default
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Environment-based configuration for the impersonation server

use propman_core::errors::{AppError, AppResult};
use propman_core::permissions::SessionLimits;
use std::env;
use std::fmt;
use tracing::info;

/// Default session ceiling applied when an admin's grant does not set one
const DEFAULT_MAX_SESSION_MINUTES: u32 = 60;
/// Default lead time for the expiry warning
const DEFAULT_WARNING_MINUTES: u32 = 10;
/// Default inactivity window
const DEFAULT_INACTIVITY_MINUTES: u32 = 15;

/// Strongly typed log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Operational messages
    #[default]
    Info,
    /// Developer diagnostics
    Debug,
    /// Everything
    Trace,
}

impl LogLevel {
    /// Parse from string with fallback to `Info`
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        write!(f, "{s}")
    }
}

/// Server configuration assembled from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port the server binds
    pub http_port: u16,
    /// Database connection string
    pub database_url: String,
    /// Log level for the tracing subscriber
    pub log_level: LogLevel,
    /// Session limits applied when a grant does not override them
    pub default_limits: SessionLimits,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let http_port = parse_env("HTTP_PORT", 8081)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./data/propman.db".to_owned());
        let log_level = LogLevel::from_str_or_default(
            &env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
        );

        let default_limits = SessionLimits {
            max_duration_minutes: parse_env(
                "IMPERSONATION_MAX_SESSION_MINUTES",
                DEFAULT_MAX_SESSION_MINUTES,
            )?,
            warning_at_minutes: parse_env(
                "IMPERSONATION_WARNING_MINUTES",
                DEFAULT_WARNING_MINUTES,
            )?,
            inactivity_timeout_minutes: parse_env(
                "IMPERSONATION_INACTIVITY_MINUTES",
                DEFAULT_INACTIVITY_MINUTES,
            )?,
        };

        let config = Self {
            http_port,
            database_url,
            log_level,
            default_limits,
        };
        info!(
            http_port = config.http_port,
            log_level = %config.log_level,
            max_session_minutes = config.default_limits.max_duration_minutes,
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::invalid_input(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_with_fallback() {
        assert_eq!(LogLevel::from_str_or_default("ERROR"), LogLevel::Error);
        assert_eq!(LogLevel::from_str_or_default("trace"), LogLevel::Trace);
        assert_eq!(LogLevel::from_str_or_default("verbose"), LogLevel::Info);
    }
}
