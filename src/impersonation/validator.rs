// ABOUTME: Pre-flight security gate run immediately before a session may start
// ABOUTME: Independent of per-request validation - defense in depth against stale callers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Security Validator
//!
//! A battery of point-in-time checks run right before a start request is
//! allowed to proceed. Deliberately re-fetches the admin's role from the
//! store instead of trusting the caller, and rejects malformed target
//! identifiers before they reach the lookup layer.

use crate::audit::AuditService;
use chrono::Utc;
use propman_core::errors::AppResult;
use propman_core::models::User;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Outcome of the pre-flight security checks
#[derive(Debug, Clone)]
pub struct SecurityCheck {
    /// Whether the start may proceed
    pub is_secure: bool,
    /// Blocking findings; any entry vetoes the start
    pub critical_issues: Vec<String>,
    /// Non-blocking findings surfaced alongside the result
    pub warnings: Vec<String>,
}

/// Pre-flight security gate for impersonation starts
pub struct SecurityValidator {
    audit: Arc<AuditService>,
}

impl SecurityValidator {
    /// Create a validator backed by the audit service
    #[must_use]
    pub fn new(audit: Arc<AuditService>) -> Self {
        Self { audit }
    }

    /// Parse a raw target identifier, rejecting anything that is not a UUID.
    ///
    /// Identifiers arrive from the client as free text; anything that does
    /// not parse is refused here rather than passed through to the store.
    #[must_use]
    pub fn parse_target_id(raw: &str) -> Option<Uuid> {
        let trimmed = raw.trim();
        match Uuid::parse_str(trimmed) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(raw_length = trimmed.len(), "Rejected malformed target identifier");
                None
            }
        }
    }

    /// Run the full pre-flight battery for a start request.
    ///
    /// `raw_target_id` is the untrusted identifier as supplied by the caller;
    /// the admin's identity is re-fetched from the store so a stale or forged
    /// client-side role cannot authorize a start.
    pub async fn check_start_request(
        &self,
        admin_id: Uuid,
        raw_target_id: &str,
    ) -> AppResult<SecurityCheck> {
        let mut critical_issues = Vec::new();
        let mut warnings = Vec::new();

        let admin = self.audit.lookup_user(admin_id).await?;
        let admin = match admin {
            Some(admin) if admin.role.is_super_admin() => Some(admin),
            Some(admin) => {
                critical_issues.push(format!(
                    "Operator role {} is not permitted to impersonate",
                    admin.role.as_str()
                ));
                None
            }
            None => {
                critical_issues.push("Operator account not found".to_owned());
                None
            }
        };

        match Self::parse_target_id(raw_target_id) {
            None => critical_issues
                .push("Target identifier is not a valid user id".to_owned()),
            Some(target_id) => {
                if target_id == admin_id {
                    critical_issues.push("Operators cannot impersonate themselves".to_owned());
                }
                match self.audit.lookup_user(target_id).await? {
                    Some(target) if target.role.is_super_admin() => {
                        critical_issues.push(
                            "Super admin accounts can never be impersonated".to_owned(),
                        );
                    }
                    Some(_) | None => {}
                }
            }
        }

        if let Some(admin) = &admin {
            self.check_session_limits(admin, &mut critical_issues, &mut warnings)
                .await?;
        }

        if !critical_issues.is_empty() {
            warn!(
                admin_id = %admin_id,
                issues = ?critical_issues,
                "Pre-flight security check blocked impersonation start"
            );
        }

        Ok(SecurityCheck {
            is_secure: critical_issues.is_empty(),
            critical_issues,
            warnings,
        })
    }

    async fn check_session_limits(
        &self,
        admin: &User,
        critical_issues: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> AppResult<()> {
        let Some(grant) = self.audit.get_user_permissions(admin.id).await? else {
            critical_issues.push("No impersonation grant on file".to_owned());
            return Ok(());
        };
        if !grant.authorizes(Utc::now()) {
            critical_issues.push("Impersonation grant is inactive or expired".to_owned());
            return Ok(());
        }

        let active = self.audit.active_session_count(admin.id).await?;
        if active >= grant.max_concurrent_sessions {
            critical_issues.push(format!(
                "Concurrent session limit of {} reached",
                grant.max_concurrent_sessions
            ));
        }

        let today = self.audit.daily_session_count(admin.id).await?;
        if today >= grant.max_daily_sessions {
            critical_issues.push(format!(
                "Daily session limit of {} reached",
                grant.max_daily_sessions
            ));
        } else if today + 2 >= grant.max_daily_sessions {
            warnings.push(format!(
                "Approaching the daily session limit ({today} of {})",
                grant.max_daily_sessions
            ));
        }

        Ok(())
    }
}
