// ABOUTME: Policy engine for impersonation - request validation, start/end, scoped user search
// ABOUTME: All state mutation happens after validation passes; failures leave nothing behind
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Impersonation Orchestrator
//!
//! The operator-facing entry point. Validates a start request end to end
//! (grant eligibility, building scoping, concurrency and daily limits, target
//! account status), starts and ends sessions through the audit service, and
//! exposes user search scoped by the operator's grant.

use crate::audit::{AuditService, SessionEndOutcome, SessionValidity};
use crate::database::{UserSearchFilters, UserSearchPage};
use crate::impersonation::monitor::SafetyMonitor;
use crate::impersonation::state::SessionStateRegistry;
use crate::impersonation::validator::SecurityValidator;
use chrono::Utc;
use propman_core::errors::{AppError, AppResult};
use propman_core::models::{AccountStatus, User, UserRole};
use propman_core::permissions::{
    ActionType, AuditedAction, EndReason, ImpersonationGrant, ImpersonationReason,
    SessionLimits,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A start request as received from the client; the target id is untrusted text
#[derive(Debug, Clone, Deserialize)]
pub struct ImpersonationRequest {
    /// Raw target user identifier
    pub target_user_id: String,
    /// Why the operator needs to impersonate
    pub reason: ImpersonationReason,
    /// Optional free-text justification
    pub additional_notes: Option<String>,
}

/// Result of validating a start request
#[derive(Debug, Clone, Serialize)]
pub struct RequestValidation {
    /// True when no blocking error was found
    pub valid: bool,
    /// Blocking findings, in check order
    pub errors: Vec<String>,
    /// Non-blocking cautions
    pub warnings: Vec<String>,
}

/// A user as returned by the impersonation picker search
#[derive(Debug, Clone, Serialize)]
pub struct SearchedUser {
    /// The user record
    #[serde(flatten)]
    pub user: User,
    /// Derived account status (suspended, inactive, active)
    pub account_status: AccountStatus,
    /// Whether the searching operator's grant permits impersonating them
    pub can_impersonate: bool,
}

/// One page of grant-scoped search results
#[derive(Debug, Clone, Serialize)]
pub struct UserSearchResult {
    /// Users on this page with derived flags
    pub users: Vec<SearchedUser>,
    /// Total matches across all pages
    pub total: u64,
    /// Whether more pages exist beyond this one
    pub has_more: bool,
}

/// Successful start outcome
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// The new session's id
    pub session_id: String,
    /// The target's public profile, now the effective actor
    pub effective_actor: User,
    /// Duration ceiling applied to the session
    pub max_duration_minutes: u32,
    /// Non-blocking cautions carried over from validation
    pub warnings: Vec<String>,
}

/// Operator-facing policy engine for the impersonation subsystem
pub struct ImpersonationOrchestrator {
    audit: Arc<AuditService>,
    validator: SecurityValidator,
    registry: Arc<SessionStateRegistry>,
    monitor: SafetyMonitor,
}

impl ImpersonationOrchestrator {
    /// Wire the orchestrator to its collaborators
    #[must_use]
    pub fn new(
        audit: Arc<AuditService>,
        validator: SecurityValidator,
        registry: Arc<SessionStateRegistry>,
        monitor: SafetyMonitor,
    ) -> Self {
        Self {
            audit,
            validator,
            registry,
            monitor,
        }
    }

    /// Search impersonation candidates within the operator's grant scope.
    ///
    /// Fails closed: an operator without an active grant gets a rejection,
    /// never an unscoped result set. Caller filters are intersected with the
    /// grant's role and building scope.
    pub async fn search_users(
        &self,
        admin_id: Uuid,
        filters: &UserSearchFilters,
        page: u32,
        page_size: u32,
    ) -> AppResult<UserSearchResult> {
        let grant = self.active_grant(admin_id).await?;

        let scoped = Self::scope_filters(filters, &grant);
        let UserSearchPage { users, total } =
            self.audit.search_users(&scoped, page, page_size).await?;

        let now = Utc::now();
        let users = users
            .into_iter()
            .map(|user| {
                let account_status = user.account_status(now);
                let can_impersonate =
                    grant.permits_role(user.role) && grant.permits_building(user.building_id);
                SearchedUser {
                    user,
                    account_status,
                    can_impersonate,
                }
            })
            .collect();

        let has_more = total > u64::from(page) * u64::from(page_size);
        Ok(UserSearchResult {
            users,
            total,
            has_more,
        })
    }

    /// Validate a start request: sequential blocking checks plus non-blocking
    /// warnings.
    ///
    /// Blocking checks stop at the first failure; warnings (approaching
    /// limits, abnormal session history) are collected regardless as long as
    /// a grant is on file.
    pub async fn validate_request(
        &self,
        admin_id: Uuid,
        request: &ImpersonationRequest,
    ) -> AppResult<RequestValidation> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let grant = match self.audit.get_user_permissions(admin_id).await? {
            Some(grant) if grant.authorizes(Utc::now()) => Some(grant),
            Some(_) => {
                errors.push("Impersonation grant is inactive or expired".to_owned());
                None
            }
            None => {
                errors.push("No impersonation grant on file".to_owned());
                None
            }
        };

        if let Some(grant) = &grant {
            if errors.is_empty() {
                self.check_target(grant, request, &mut errors).await?;
            }
            self.collect_capacity_findings(admin_id, grant, &mut errors, &mut warnings)
                .await?;
        }

        Ok(RequestValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        })
    }

    /// Start impersonating.
    ///
    /// Runs the pre-flight security gate and full request validation before
    /// any state is touched. On success the session record exists, the
    /// session-start action is logged, the state holder points at the target,
    /// and the safety timers are armed. Not idempotent: a second call opens a
    /// second session if the limits allow it.
    pub async fn start_impersonation(
        &self,
        admin: &User,
        request: &ImpersonationRequest,
    ) -> AppResult<StartOutcome> {
        let gate = self
            .validator
            .check_start_request(admin.id, &request.target_user_id)
            .await?;
        if !gate.is_secure {
            return Err(AppError::permission_denied(gate.critical_issues.join("; ")));
        }

        let validation = self.validate_request(admin.id, request).await?;
        if !validation.valid {
            return Err(AppError::permission_denied(validation.errors.join("; ")));
        }

        // The gate already rejected malformed identifiers
        let target_id = SecurityValidator::parse_target_id(&request.target_user_id)
            .ok_or_else(|| AppError::invalid_input("Target identifier is not a valid user id"))?;
        let target = self
            .audit
            .lookup_user(target_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No user with id {target_id}")))?;
        let grant = self.active_grant(admin.id).await?;

        // The insert below is the serialization point: a concurrent start for
        // the same pair loses here with a conflict, after which nothing has
        // been mutated for the loser.
        let session = self
            .audit
            .start_session(
                admin,
                &target,
                request.reason,
                request.additional_notes.clone(),
            )
            .await?;

        let ceiling = grant.max_session_duration_minutes;
        self.registry
            .begin(admin.clone(), target.clone(), &session, ceiling);
        self.monitor.start_monitoring(
            &session,
            SessionLimits {
                max_duration_minutes: ceiling,
                ..self.audit.default_limits()
            },
            ceiling,
        );

        info!(
            session_id = %session.id,
            admin_id = %admin.id,
            target_user_id = %target.id,
            "Impersonation started"
        );

        Ok(StartOutcome {
            session_id: session.id,
            effective_actor: target,
            max_duration_minutes: ceiling,
            warnings: validation.warnings,
        })
    }

    /// End impersonating.
    ///
    /// Fails with a not-found error when no active session has this id, so a
    /// second end call reports failure rather than double-closing. Timers are
    /// torn down and the state holder reverts to the real actor.
    pub async fn end_impersonation(
        &self,
        session_id: &str,
        reason: EndReason,
        notes: Option<&str>,
    ) -> AppResult<SessionEndOutcome> {
        self.monitor.stop_monitoring(session_id);
        let outcome = self.audit.end_session(session_id, reason, notes).await?;
        self.registry.clear_session(session_id);

        info!(
            session_id = %session_id,
            reason = ?reason,
            duration_minutes = outcome.duration_minutes,
            actions_performed = outcome.actions_performed,
            "Impersonation ended"
        );
        Ok(outcome)
    }

    /// Record an audited action for the operator's current session.
    ///
    /// Silent no-op when the operator is not impersonating: read-type UI
    /// actions must never fail because audit context is missing. Failures
    /// inside the audit write itself are likewise swallowed downstream.
    pub async fn log_action(
        &self,
        admin_id: Uuid,
        action_type: ActionType,
        description: impl Into<String>,
        page_context: Option<String>,
    ) {
        let Some(state) = self.registry.state(admin_id) else {
            debug!(admin_id = %admin_id, "log_action outside a session; ignoring");
            return;
        };
        let (Some(session_id), Some(target)) = (state.session_id, state.effective_actor) else {
            debug!(admin_id = %admin_id, "log_action without an active overlay; ignoring");
            return;
        };

        let mut action = AuditedAction::new(
            session_id,
            admin_id,
            target.id,
            action_type,
            description.into(),
        );
        if let Some(page) = page_context {
            action = action.with_page_context(page);
        }

        let grant = match self.audit.get_user_permissions(admin_id).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(admin_id = %admin_id, "Grant lookup failed while logging action: {e}");
                None
            }
        };
        self.audit.log_action(action, grant.as_ref()).await;
    }

    /// Whether the operator may perform an action right now.
    ///
    /// Always true outside impersonation. While impersonating,
    /// security-critical actions (password reset, email change, role change)
    /// are policy violations and are rejected outright, as is anything on the
    /// grant's restricted list.
    pub async fn can_perform_action(
        &self,
        admin_id: Uuid,
        action_type: ActionType,
    ) -> AppResult<bool> {
        if !self.registry.is_impersonating(admin_id) {
            return Ok(true);
        }
        if action_type.is_security_critical() {
            return Ok(false);
        }

        let restricted = self
            .audit
            .get_user_permissions(admin_id)
            .await?
            .is_some_and(|grant| grant.restricts_action(action_type));
        Ok(!restricted)
    }

    /// Liveness check of the operator's current session, if any
    pub async fn check_session_status(
        &self,
        admin_id: Uuid,
    ) -> AppResult<Option<SessionValidity>> {
        match self.registry.session_id(admin_id) {
            Some(session_id) => Ok(Some(self.audit.validate_session(&session_id).await?)),
            None => Ok(None),
        }
    }

    async fn active_grant(&self, admin_id: Uuid) -> AppResult<ImpersonationGrant> {
        let grant = self
            .audit
            .get_user_permissions(admin_id)
            .await?
            .ok_or_else(|| AppError::grant_inactive("No impersonation grant on file"))?;
        if !grant.authorizes(Utc::now()) {
            return Err(AppError::grant_inactive(
                "Impersonation grant is inactive or expired",
            ));
        }
        Ok(grant)
    }

    fn scope_filters(filters: &UserSearchFilters, grant: &ImpersonationGrant) -> UserSearchFilters {
        let roles = if filters.roles.is_empty() {
            grant.allowed_target_roles.clone()
        } else {
            filters
                .roles
                .iter()
                .copied()
                .filter(|r| grant.permits_role(*r))
                .collect()
        };

        let building_ids = match (&grant.allowed_building_ids, &filters.building_ids) {
            (None, requested) => requested.clone(),
            (Some(allowed), None) => Some(allowed.clone()),
            (Some(allowed), Some(requested)) => Some(
                requested
                    .iter()
                    .copied()
                    .filter(|id| allowed.contains(id))
                    .collect(),
            ),
        };

        UserSearchFilters {
            roles,
            building_ids,
            ..filters.clone()
        }
    }

    async fn check_target(
        &self,
        grant: &ImpersonationGrant,
        request: &ImpersonationRequest,
        errors: &mut Vec<String>,
    ) -> AppResult<()> {
        let Some(target_id) = SecurityValidator::parse_target_id(&request.target_user_id) else {
            errors.push("Target identifier is not a valid user id".to_owned());
            return Ok(());
        };
        let Some(target) = self.audit.lookup_user(target_id).await? else {
            errors.push("Target user not found".to_owned());
            return Ok(());
        };

        if target.role == UserRole::SuperAdmin {
            errors.push("Super admin accounts can never be impersonated".to_owned());
            return Ok(());
        }
        if !grant.permits_role(target.role) {
            errors.push(format!(
                "Role {} is not within this grant's allowed target roles",
                target.role.as_str()
            ));
            return Ok(());
        }
        if !grant.permits_building(target.building_id) {
            errors.push("Target's building is outside this grant's scope".to_owned());
            return Ok(());
        }
        if target.account_status(Utc::now()) == AccountStatus::Suspended {
            errors.push("Target account is suspended".to_owned());
        }
        Ok(())
    }

    async fn collect_capacity_findings(
        &self,
        admin_id: Uuid,
        grant: &ImpersonationGrant,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> AppResult<()> {
        let active = self.audit.active_session_count(admin_id).await?;
        if errors.is_empty() && active >= grant.max_concurrent_sessions {
            errors.push(format!(
                "Concurrent session limit of {} reached",
                grant.max_concurrent_sessions
            ));
        } else if active + 1 >= grant.max_concurrent_sessions {
            warnings.push(format!(
                "This session will use the last of {} concurrent slots",
                grant.max_concurrent_sessions
            ));
        }

        let today = self.audit.daily_session_count(admin_id).await?;
        if errors.is_empty() && today >= grant.max_daily_sessions {
            errors.push(format!(
                "Daily session limit of {} reached",
                grant.max_daily_sessions
            ));
        } else if today + 2 >= grant.max_daily_sessions {
            warnings.push(format!(
                "Approaching the daily session limit ({today} of {})",
                grant.max_daily_sessions
            ));
        }

        let abnormal = self.audit.recent_abnormal_endings(admin_id).await?;
        if abnormal >= 3 {
            warnings.push(format!(
                "{abnormal} of the last 10 sessions ended abnormally; proceed with caution"
            ));
        }

        Ok(())
    }
}
