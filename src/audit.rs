// ABOUTME: Audit service owning all reads and writes to the impersonation audit log
// ABOUTME: Session lifecycle, per-action records, alerts, liveness checks, and reporting rollups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Audit Service
//!
//! Owns every read and write against the audit log and permission store.
//! Sessions are append-only: they are created once, closed once by the shared
//! conditional update, and never deleted.

use crate::database::{Database, SessionFilters, UserSearchFilters, UserSearchPage};
use chrono::{DateTime, Duration, Utc};
use propman_core::errors::{AppError, AppResult};
use propman_core::models::User;
use propman_core::permissions::{
    ActionType, AlertSeverity, AlertType, AuditedAction, EndReason, ImpersonationGrant,
    ImpersonationReason, ImpersonationSession, RiskLevel, SecurityAlert, SessionLimits,
    SessionStatus,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Warning thresholds (minutes remaining) surfaced by session liveness checks
const REMAINING_WARN_MINUTES: [i64; 2] = [15, 5];

/// How many recent sessions and top targets the summary reports
const SUMMARY_TOP_N: usize = 5;

/// Result of closing a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionEndOutcome {
    /// Session that was closed
    pub session_id: String,
    /// Terminal status the end reason mapped to
    pub status: SessionStatus,
    /// Whole minutes between start and end, rounded
    pub duration_minutes: i64,
    /// Number of actions logged during the session
    pub actions_performed: u64,
}

/// Point-in-time liveness check of a session against its grant limits
#[derive(Debug, Clone, Serialize)]
pub struct SessionValidity {
    /// Whether the session is still within its duration ceiling
    pub valid: bool,
    /// Minutes remaining before the ceiling; zero once exceeded
    pub time_remaining_minutes: i64,
    /// Non-blocking warnings (approaching expiry)
    pub warnings: Vec<String>,
}

/// Count of actions of one type
#[derive(Debug, Clone, Serialize)]
pub struct ActionTypeCount {
    /// Action type
    pub action_type: ActionType,
    /// Occurrences in the window
    pub count: u64,
}

/// Count of actions at one risk level
#[derive(Debug, Clone, Serialize)]
pub struct RiskLevelCount {
    /// Risk level
    pub risk_level: RiskLevel,
    /// Occurrences in the window
    pub count: u64,
}

/// One frequently-impersonated target
#[derive(Debug, Clone, Serialize)]
pub struct TargetUsage {
    /// Target user
    pub target_user_id: Uuid,
    /// Target email at the time of the sessions
    pub target_email: String,
    /// Sessions against this target in the window
    pub session_count: u64,
}

/// Read-side reporting rollup over a date window
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    /// Window start
    pub from: DateTime<Utc>,
    /// Window end
    pub to: DateTime<Utc>,
    /// Sessions started in the window
    pub total_sessions: u64,
    /// Of those, still active
    pub active_sessions: u64,
    /// Sum of session durations in minutes
    pub total_duration_minutes: i64,
    /// Mean session duration in minutes
    pub average_duration_minutes: f64,
    /// Action counts by type
    pub actions_by_type: Vec<ActionTypeCount>,
    /// Action counts by risk level
    pub actions_by_risk: Vec<RiskLevelCount>,
    /// Most-impersonated targets by session count
    pub top_targets: Vec<TargetUsage>,
    /// Most recent session records
    pub recent_sessions: Vec<ImpersonationSession>,
}

/// Audit service owning the impersonation audit trail
pub struct AuditService {
    database: Arc<Database>,
    default_limits: SessionLimits,
}

impl AuditService {
    /// Create a new audit service
    #[must_use]
    pub fn new(database: Arc<Database>, default_limits: SessionLimits) -> Self {
        Self {
            database,
            default_limits,
        }
    }

    /// Limits applied when an admin has no grant on file
    #[must_use]
    pub const fn default_limits(&self) -> SessionLimits {
        self.default_limits
    }

    /// Open a new session record and write the mandatory session-start action.
    ///
    /// The insert is the serialization point for the one-active-session-per-pair
    /// invariant; a losing concurrent insert surfaces as a conflict error.
    pub async fn start_session(
        &self,
        admin: &User,
        target: &User,
        reason: ImpersonationReason,
        additional_notes: Option<String>,
    ) -> AppResult<ImpersonationSession> {
        let session = ImpersonationSession::new(admin, target, reason, additional_notes);
        self.database.create_session(&session).await?;

        let start_action = AuditedAction::new(
            &session.id,
            admin.id,
            target.id,
            ActionType::SessionStart,
            AuditedAction::session_start_description(reason),
        );
        // Availability over strict completeness: a failed start-action write
        // is logged, not propagated, so the session itself stands.
        self.log_action(start_action, None).await;

        info!(
            session_id = %session.id,
            admin_id = %admin.id,
            admin_email = %admin.email,
            target_user_id = %target.id,
            target_email = %target.email,
            reason = ?reason,
            "Impersonation session started"
        );

        Ok(session)
    }

    /// Close a session.
    ///
    /// Fails with a not-found error if the session does not exist or is no
    /// longer active; a second end call therefore reports failure instead of
    /// double-closing.
    pub async fn end_session(
        &self,
        session_id: &str,
        reason: EndReason,
        notes: Option<&str>,
    ) -> AppResult<SessionEndOutcome> {
        let ended_at = Utc::now();
        let ended = self
            .database
            .end_session_if_active(session_id, reason, ended_at)
            .await?;
        if !ended {
            return Err(AppError::not_found(format!(
                "No active session with id {session_id}"
            )));
        }

        if let Some(notes) = notes {
            self.database.append_session_notes(session_id, notes).await?;
        }

        let session = self
            .database
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Session {session_id} disappeared")))?;
        let actions_performed = self.database.count_session_actions(session_id).await?;

        info!(
            session_id = %session_id,
            status = session.status.as_str(),
            duration_minutes = session.duration_minutes(),
            actions_performed,
            "Impersonation session ended"
        );

        Ok(SessionEndOutcome {
            session_id: session_id.to_owned(),
            status: session.status,
            duration_minutes: session.duration_minutes(),
            actions_performed,
        })
    }

    /// Append an action record; best-effort.
    ///
    /// A transient audit outage must not block the operator's ongoing work, so
    /// failures are logged to the diagnostic channel and swallowed. The gap is
    /// visible after the fact through the session-end `actions_performed`
    /// reconciliation.
    pub async fn log_action(&self, action: AuditedAction, grant: Option<&ImpersonationGrant>) {
        let restricted = grant.is_some_and(|g| g.restricts_action(action.action_type));

        if let Err(e) = self.database.create_action(&action).await {
            error!(
                session_id = %action.session_id,
                action_type = action.action_type.as_str(),
                "Failed to record audited action: {e}"
            );
            return;
        }

        self.raise_alerts_for(&action, restricted).await;
    }

    /// Alert side effect for risky or restricted actions; never aborts the
    /// primary audit write
    async fn raise_alerts_for(&self, action: &AuditedAction, restricted: bool) {
        let mut alerts = Vec::new();

        match action.risk_level {
            RiskLevel::Critical => alerts.push(SecurityAlert::new(
                AlertType::SuspiciousActivity,
                AlertSeverity::Critical,
                format!(
                    "Critical-risk action {} during impersonation: {}",
                    action.action_type.as_str(),
                    action.description
                ),
            )),
            RiskLevel::High => alerts.push(SecurityAlert::new(
                AlertType::SuspiciousActivity,
                AlertSeverity::High,
                format!(
                    "High-risk action {} during impersonation: {}",
                    action.action_type.as_str(),
                    action.description
                ),
            )),
            RiskLevel::Low | RiskLevel::Medium => {}
        }

        if restricted {
            alerts.push(SecurityAlert::new(
                AlertType::UnauthorizedAction,
                AlertSeverity::High,
                format!(
                    "Action {} is restricted by the admin's grant",
                    action.action_type.as_str()
                ),
            ));
        }

        for alert in alerts {
            let alert =
                alert.with_session(&action.session_id, action.admin_id, action.target_user_id);
            if let Err(e) = self.database.create_alert(&alert).await {
                warn!(
                    session_id = %action.session_id,
                    alert_type = alert.alert_type.as_str(),
                    "Failed to store security alert: {e}"
                );
            }
        }
    }

    /// Look up a user by id in the identity store
    pub async fn lookup_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        self.database.get_user(user_id).await
    }

    /// Grant-scoped user search; filters are expected to already carry the
    /// grant's role and building scope
    pub async fn search_users(
        &self,
        filters: &UserSearchFilters,
        page: u32,
        page_size: u32,
    ) -> AppResult<UserSearchPage> {
        self.database.search_users(filters, page, page_size).await
    }

    /// Impersonation grant for an admin, if any
    pub async fn get_user_permissions(
        &self,
        admin_id: Uuid,
    ) -> AppResult<Option<ImpersonationGrant>> {
        self.database.get_grant(admin_id).await
    }

    /// Active sessions, optionally restricted to one admin
    pub async fn get_active_sessions(
        &self,
        admin_id: Option<Uuid>,
    ) -> AppResult<Vec<ImpersonationSession>> {
        self.database.get_active_sessions(admin_id).await
    }

    /// Session audit records matching the filters, newest first
    pub async fn get_audit_log(
        &self,
        filters: &SessionFilters,
        limit: u32,
    ) -> AppResult<Vec<ImpersonationSession>> {
        self.database.list_sessions(filters, limit).await
    }

    /// All actions recorded for a session, oldest first
    pub async fn get_session_actions(&self, session_id: &str) -> AppResult<Vec<AuditedAction>> {
        self.database.get_session_actions(session_id).await
    }

    /// A single session by id
    pub async fn get_session(&self, session_id: &str) -> AppResult<Option<ImpersonationSession>> {
        self.database.get_session(session_id).await
    }

    /// Validate a session against its grant's duration ceiling
    pub async fn validate_session(&self, session_id: &str) -> AppResult<SessionValidity> {
        let session = self
            .database
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No session with id {session_id}")))?;

        if session.status != SessionStatus::Active {
            return Ok(SessionValidity {
                valid: false,
                time_remaining_minutes: 0,
                warnings: vec!["Session has already ended".to_owned()],
            });
        }

        let max_minutes = self
            .max_duration_for(session.admin_id)
            .await?
            .unwrap_or(i64::from(self.default_limits.max_duration_minutes));
        let elapsed = (Utc::now() - session.started_at).num_minutes();
        let remaining = max_minutes - elapsed;

        let mut warnings = Vec::new();
        for threshold in REMAINING_WARN_MINUTES {
            if remaining > 0 && remaining <= threshold {
                warnings.push(format!("Session expires in {remaining} minutes"));
                break;
            }
        }

        Ok(SessionValidity {
            valid: elapsed < max_minutes,
            time_remaining_minutes: remaining.max(0),
            warnings,
        })
    }

    /// Close every active session held by an admin; returns the count closed.
    ///
    /// Used by security controls; each closed session gets a high-risk
    /// forced-end action.
    pub async fn force_end_all_sessions(
        &self,
        admin_id: Uuid,
        reason: EndReason,
    ) -> AppResult<u64> {
        let active = self.database.get_active_sessions(Some(admin_id)).await?;
        let count = self.database.end_all_sessions(admin_id, reason).await?;

        for session in active {
            let action = AuditedAction::new(
                &session.id,
                session.admin_id,
                session.target_user_id,
                ActionType::SessionEnd,
                format!("Session force-ended in bulk close ({reason:?})"),
            )
            .with_risk_level(RiskLevel::High);
            self.log_action(action, None).await;
        }

        Ok(count)
    }

    /// Reporting rollup over a date window; read-only
    pub async fn get_audit_summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        admin_id: Option<Uuid>,
    ) -> AppResult<AuditSummary> {
        let filters = SessionFilters {
            admin_id,
            started_after: Some(from),
            started_before: Some(to),
            ..SessionFilters::default()
        };
        let sessions = self.database.list_sessions(&filters, u32::MAX).await?;

        let total_sessions = sessions.len() as u64;
        let active_sessions = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count() as u64;
        let total_duration_minutes: i64 = sessions.iter().map(ImpersonationSession::duration_minutes).sum();
        let average_duration_minutes = if sessions.is_empty() {
            0.0
        } else {
            total_duration_minutes as f64 / sessions.len() as f64
        };

        let mut by_target: std::collections::HashMap<Uuid, (String, u64)> =
            std::collections::HashMap::new();
        for session in &sessions {
            let entry = by_target
                .entry(session.target_user_id)
                .or_insert_with(|| (session.target_email.clone(), 0));
            entry.1 += 1;
        }
        let mut top_targets: Vec<TargetUsage> = by_target
            .into_iter()
            .map(|(target_user_id, (target_email, session_count))| TargetUsage {
                target_user_id,
                target_email,
                session_count,
            })
            .collect();
        top_targets.sort_by(|a, b| b.session_count.cmp(&a.session_count));
        top_targets.truncate(SUMMARY_TOP_N);

        let actions_by_type = self
            .database
            .count_actions_by_type(from, to, admin_id)
            .await?
            .into_iter()
            .map(|(action_type, count)| ActionTypeCount { action_type, count })
            .collect();
        let actions_by_risk = self
            .database
            .count_actions_by_risk(from, to, admin_id)
            .await?
            .into_iter()
            .map(|(risk_level, count)| RiskLevelCount { risk_level, count })
            .collect();

        let recent_sessions = sessions.into_iter().take(SUMMARY_TOP_N).collect();

        Ok(AuditSummary {
            from,
            to,
            total_sessions,
            active_sessions,
            total_duration_minutes,
            average_duration_minutes,
            actions_by_type,
            actions_by_risk,
            top_targets,
            recent_sessions,
        })
    }

    /// Count of sessions started by this admin since UTC midnight
    pub async fn daily_session_count(&self, admin_id: Uuid) -> AppResult<u32> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or_else(Utc::now, |dt| dt.and_utc());
        self.database.count_sessions_since(admin_id, midnight).await
    }

    /// Count of currently active sessions for this admin
    pub async fn active_session_count(&self, admin_id: Uuid) -> AppResult<u32> {
        self.database.count_active_sessions(admin_id).await
    }

    /// Of the admin's last ten sessions, how many ended abnormally
    pub async fn recent_abnormal_endings(&self, admin_id: Uuid) -> AppResult<u32> {
        let recent = self.database.recent_sessions(admin_id, 10).await?;
        Ok(recent.iter().filter(|s| s.status.is_abnormal()).count() as u32)
    }

    async fn max_duration_for(&self, admin_id: Uuid) -> AppResult<Option<i64>> {
        Ok(self
            .database
            .get_grant(admin_id)
            .await?
            .map(|g| i64::from(g.max_session_duration_minutes)))
    }
}

/// Elapsed minutes helper shared by the watchdog and liveness checks
#[must_use]
pub fn elapsed_minutes(started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - started_at).num_minutes()
}

/// True when a rehydrated or monitored session has outlived its ceiling
#[must_use]
pub fn session_expired(started_at: DateTime<Utc>, max_duration_minutes: u32, now: DateTime<Utc>) -> bool {
    now - started_at >= Duration::minutes(i64::from(max_duration_minutes))
}
