// ABOUTME: Impersonation system for super admins to act as other users
// ABOUTME: Grants bound eligibility and limits; sessions form the audit trail
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use crate::models::{User, UserRole};
use crate::permissions::audit::ActionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization record bounding what an operator may do via impersonation.
///
/// Grants are created and revoked by a separate administrative process and are
/// read-only to this subsystem. A grant with `is_active = false` or an expiry
/// in the past authorizes nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationGrant {
    /// Admin this grant belongs to
    pub admin_id: Uuid,
    /// Roles the admin may impersonate (never includes `SuperAdmin`)
    pub allowed_target_roles: Vec<UserRole>,
    /// Buildings the admin may reach into; `None` means unrestricted
    pub allowed_building_ids: Option<Vec<Uuid>>,
    /// Hard ceiling on a single session's duration
    pub max_session_duration_minutes: u32,
    /// Maximum sessions the admin may start per UTC day
    pub max_daily_sessions: u32,
    /// Maximum simultaneously active sessions across devices/tabs
    pub max_concurrent_sessions: u32,
    /// Actions explicitly allowed during impersonation
    pub allowed_actions: Vec<ActionType>,
    /// Actions explicitly forbidden during impersonation
    pub restricted_actions: Vec<ActionType>,
    /// Who granted this permission
    pub granted_by: Uuid,
    /// When the permission was granted
    pub granted_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the grant is currently active
    pub is_active: bool,
}

impl ImpersonationGrant {
    /// Whether this grant authorizes anything at the given instant
    #[must_use]
    pub fn authorizes(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| now < exp)
    }

    /// Whether the grant permits impersonating the given role
    #[must_use]
    pub fn permits_role(&self, role: UserRole) -> bool {
        !role.is_super_admin() && self.allowed_target_roles.contains(&role)
    }

    /// Whether the grant permits reaching into the given building
    #[must_use]
    pub fn permits_building(&self, building_id: Option<Uuid>) -> bool {
        match (&self.allowed_building_ids, building_id) {
            (None, _) => true,
            (Some(allowed), Some(id)) => allowed.contains(&id),
            (Some(_), None) => false,
        }
    }

    /// Whether the grant forbids the given action
    #[must_use]
    pub fn restricts_action(&self, action: ActionType) -> bool {
        self.restricted_actions.contains(&action)
    }
}

/// Why the operator is impersonating; required at start and persisted on the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpersonationReason {
    /// Responding to a support request from the user
    CustomerSupport,
    /// Diagnosing a technical problem in the user's context
    TechnicalIssue,
    /// Investigating a data discrepancy
    DataInvestigation,
    /// Helping the user recover access to their account
    AccountRecovery,
    /// Reviewing the account for compliance purposes
    ComplianceReview,
    /// Reproducing a reported bug
    BugInvestigation,
    /// Training or demonstration
    TrainingDemo,
}

impl ImpersonationReason {
    /// Human-readable label
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::CustomerSupport => "Customer Support",
            Self::TechnicalIssue => "Technical Issue",
            Self::DataInvestigation => "Data Investigation",
            Self::AccountRecovery => "Account Recovery",
            Self::ComplianceReview => "Compliance Review",
            Self::BugInvestigation => "Bug Investigation",
            Self::TrainingDemo => "Training/Demo",
        }
    }
}

/// How a session may be terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Operator ended the session themselves
    Manual,
    /// Hard duration ceiling reached
    Timeout,
    /// No observed input for the inactivity window
    Inactivity,
    /// Forced by a security control
    Security,
    /// Anything else (infrastructure failure, bulk close)
    Other,
}

impl EndReason {
    /// The terminal session status a termination reason maps to
    #[must_use]
    pub const fn session_status(&self) -> SessionStatus {
        match self {
            Self::Manual => SessionStatus::EndedManually,
            Self::Timeout => SessionStatus::EndedTimeout,
            Self::Inactivity => SessionStatus::EndedInactivity,
            Self::Security => SessionStatus::EndedSecurity,
            Self::Other => SessionStatus::EndedError,
        }
    }
}

/// Lifecycle status of an impersonation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is in progress
    Active,
    /// Ended by the operator
    EndedManually,
    /// Ended by the hard duration ceiling
    EndedTimeout,
    /// Ended after the inactivity window elapsed
    EndedInactivity,
    /// Ended by a security control
    EndedSecurity,
    /// Ended abnormally
    EndedError,
}

impl SessionStatus {
    /// String form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::EndedManually => "ended_manually",
            Self::EndedTimeout => "ended_timeout",
            Self::EndedInactivity => "ended_inactivity",
            Self::EndedSecurity => "ended_security",
            Self::EndedError => "ended_error",
        }
    }

    /// Parse from the stored string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "ended_manually" => Some(Self::EndedManually),
            "ended_timeout" => Some(Self::EndedTimeout),
            "ended_inactivity" => Some(Self::EndedInactivity),
            "ended_security" => Some(Self::EndedSecurity),
            "ended_error" => Some(Self::EndedError),
            _ => None,
        }
    }

    /// Whether the session ended abnormally (security or error)
    #[must_use]
    pub const fn is_abnormal(&self) -> bool {
        matches!(self, Self::EndedSecurity | Self::EndedError)
    }
}

/// One bounded period of impersonating a specific target; append-only audit entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationSession {
    /// Opaque unique session token
    pub id: String,
    /// Super admin performing the impersonation
    pub admin_id: Uuid,
    /// Denormalized admin email for audit readability
    pub admin_email: String,
    /// User being impersonated
    pub target_user_id: Uuid,
    /// Denormalized target email
    pub target_email: String,
    /// Target's role at session start
    pub target_role: UserRole,
    /// Target's building at session start, if any
    pub target_building_id: Option<Uuid>,
    /// Why the session was started
    pub reason: ImpersonationReason,
    /// Free-text notes supplied at start or end
    pub additional_notes: Option<String>,
    /// When impersonation started
    pub started_at: DateTime<Utc>,
    /// When impersonation ended (`None` while active)
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifecycle status
    pub status: SessionStatus,
}

impl ImpersonationSession {
    /// Open a new active session
    #[must_use]
    pub fn new(
        admin: &User,
        target: &User,
        reason: ImpersonationReason,
        additional_notes: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            admin_id: admin.id,
            admin_email: admin.email.clone(),
            target_user_id: target.id,
            target_email: target.email.clone(),
            target_role: target.role,
            target_building_id: target.building_id,
            reason,
            additional_notes,
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
        }
    }

    /// Session duration in whole minutes, rounded; for active sessions,
    /// measured up to now
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        let millis = (end - self.started_at).num_milliseconds();
        (millis as f64 / 60_000.0).round() as i64
    }
}

/// Timer configuration for one monitored session
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Hard ceiling on session duration
    pub max_duration_minutes: u32,
    /// How long before the ceiling the operator is warned
    pub warning_at_minutes: u32,
    /// Inactivity window before forced termination
    pub inactivity_timeout_minutes: u32,
}

/// In-memory record of who the real and effective actors are right now.
///
/// Invariant: `is_impersonating()` iff the effective actor differs from the
/// real one, and the effective actor is never a super admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationState {
    /// The actually-authenticated operator
    pub real_actor: User,
    /// The identity the rest of the system treats as "current user"
    pub effective_actor: Option<User>,
    /// Active session token, if impersonating
    pub session_id: Option<String>,
    /// Reason recorded at session start
    pub reason: Option<ImpersonationReason>,
    /// When the current session started
    pub started_at: Option<DateTime<Utc>>,
    /// Duration ceiling for the current session
    pub max_duration_minutes: u32,
    /// Whether the expiry warning has been surfaced to the operator
    pub warning_shown: bool,
}

impl ImpersonationState {
    /// State for an operator who is not impersonating anyone
    #[must_use]
    pub fn idle(real_actor: User, max_duration_minutes: u32) -> Self {
        Self {
            real_actor,
            effective_actor: None,
            session_id: None,
            reason: None,
            started_at: None,
            max_duration_minutes,
            warning_shown: false,
        }
    }

    /// Whether an impersonation session is in progress
    #[must_use]
    pub const fn is_impersonating(&self) -> bool {
        self.effective_actor.is_some()
    }

    /// Elapsed minutes of the current session, if any
    #[must_use]
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|start| (now - start).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(admin_id: Uuid) -> ImpersonationGrant {
        ImpersonationGrant {
            admin_id,
            allowed_target_roles: vec![UserRole::Leaseholder, UserRole::Tenant],
            allowed_building_ids: None,
            max_session_duration_minutes: 60,
            max_daily_sessions: 5,
            max_concurrent_sessions: 1,
            allowed_actions: vec![],
            restricted_actions: vec![ActionType::FinancialTransaction],
            granted_by: Uuid::new_v4(),
            granted_at: Utc::now(),
            expires_at: None,
            is_active: true,
        }
    }

    #[test]
    fn inactive_or_expired_grant_authorizes_nothing() {
        let now = Utc::now();
        let mut g = grant(Uuid::new_v4());
        assert!(g.authorizes(now));

        g.is_active = false;
        assert!(!g.authorizes(now));

        g.is_active = true;
        g.expires_at = Some(now - Duration::minutes(1));
        assert!(!g.authorizes(now));
    }

    #[test]
    fn grant_never_permits_super_admin_role() {
        let mut g = grant(Uuid::new_v4());
        g.allowed_target_roles.push(UserRole::SuperAdmin);
        assert!(!g.permits_role(UserRole::SuperAdmin));
        assert!(g.permits_role(UserRole::Leaseholder));
    }

    #[test]
    fn building_scoping() {
        let building = Uuid::new_v4();
        let mut g = grant(Uuid::new_v4());
        assert!(g.permits_building(Some(building)));
        assert!(g.permits_building(None));

        g.allowed_building_ids = Some(vec![building]);
        assert!(g.permits_building(Some(building)));
        assert!(!g.permits_building(Some(Uuid::new_v4())));
        assert!(!g.permits_building(None));
    }

    #[test]
    fn end_reason_maps_to_terminal_status() {
        assert_eq!(
            EndReason::Manual.session_status(),
            SessionStatus::EndedManually
        );
        assert_eq!(
            EndReason::Timeout.session_status(),
            SessionStatus::EndedTimeout
        );
        assert_eq!(
            EndReason::Inactivity.session_status(),
            SessionStatus::EndedInactivity
        );
        assert_eq!(
            EndReason::Security.session_status(),
            SessionStatus::EndedSecurity
        );
        assert_eq!(EndReason::Other.session_status(), SessionStatus::EndedError);
    }

    #[test]
    fn duration_is_rounded_minutes() {
        let admin = User::new("admin@example.com", None, UserRole::SuperAdmin);
        let target = User::new("lease@example.com", None, UserRole::Leaseholder);
        let mut session = ImpersonationSession::new(
            &admin,
            &target,
            ImpersonationReason::CustomerSupport,
            None,
        );
        session.started_at = Utc::now() - Duration::seconds(150);
        session.ended_at = Some(Utc::now());
        // 150s rounds to 3 minutes, not truncated to 2
        assert_eq!(session.duration_minutes(), 3);
        assert!(session.ended_at.unwrap_or_default() >= session.started_at);
    }
}
