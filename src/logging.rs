// ABOUTME: Structured logging setup built on the tracing subscriber stack
// ABOUTME: Format and verbosity come from the environment; defaults favor readability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Structured logging configuration

use crate::config::LogLevel;
use anyhow::Result;
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines for production log shippers
    Json,
    /// Pretty multi-line output for development
    Pretty,
    /// Single-line output for space-constrained environments
    Compact,
}

impl LogFormat {
    /// Read the format from `LOG_FORMAT`, defaulting to pretty
    #[must_use]
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            Ok("compact") => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set. Chatty dependencies
/// are pinned to `warn` unless explicitly raised.
pub fn init(level: LogLevel) -> Result<()> {
    let filter = env::var("RUST_LOG").map_or_else(
        |_| EnvFilter::new(format!("{level},sqlx=warn,hyper=warn,tower=warn")),
        EnvFilter::new,
    );

    let format = LogFormat::from_env();
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()?,
    }

    info!(level = %level, format = ?format, "Logging initialized");
    Ok(())
}
