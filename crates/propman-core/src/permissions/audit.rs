// ABOUTME: Audited action types, risk classification, and security alerts
// ABOUTME: Risk is a single exhaustive table so adding an action type is a one-line change
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use crate::permissions::impersonation::ImpersonationReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of interactions audited during an impersonation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Navigation to a page
    PageVisit,
    /// Read-only view of a record
    DataView,
    /// Modification of a record
    DataModification,
    /// Export of data out of the platform
    DataExport,
    /// Document uploaded
    DocumentUpload,
    /// Document deleted
    DocumentDelete,
    /// Document downloaded
    DocumentDownload,
    /// Meeting created, changed, or cancelled
    MeetingAction,
    /// Compliance record touched
    ComplianceAction,
    /// Settings changed
    SettingsChange,
    /// Another user's profile data changed
    UserDataChange,
    /// Vote cast or ballot changed
    VotingAction,
    /// Money moved
    FinancialTransaction,
    /// Password reset triggered
    PasswordReset,
    /// Account email changed
    EmailChange,
    /// Account role changed
    RoleChange,
    /// Impersonation session opened
    SessionStart,
    /// Impersonation session closed
    SessionEnd,
    /// Message sent on behalf of the target
    MessageSend,
}

impl ActionType {
    /// Risk classification driving alerting.
    ///
    /// Kept as one exhaustive table: a new action type fails to compile until
    /// it is classified here.
    #[must_use]
    pub const fn risk_level(&self) -> RiskLevel {
        match self {
            Self::PageVisit | Self::DataView | Self::DocumentDownload | Self::SessionStart
            | Self::SessionEnd => RiskLevel::Low,

            Self::DataModification
            | Self::DataExport
            | Self::DocumentUpload
            | Self::MeetingAction
            | Self::ComplianceAction
            | Self::SettingsChange
            | Self::MessageSend => RiskLevel::Medium,

            Self::DocumentDelete | Self::UserDataChange | Self::VotingAction => RiskLevel::High,

            Self::FinancialTransaction | Self::PasswordReset | Self::EmailChange
            | Self::RoleChange => RiskLevel::Critical,
        }
    }

    /// Actions that are policy violations while impersonating, regardless of grant
    #[must_use]
    pub const fn is_security_critical(&self) -> bool {
        matches!(self, Self::PasswordReset | Self::EmailChange | Self::RoleChange)
    }

    /// String form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PageVisit => "page_visit",
            Self::DataView => "data_view",
            Self::DataModification => "data_modification",
            Self::DataExport => "data_export",
            Self::DocumentUpload => "document_upload",
            Self::DocumentDelete => "document_delete",
            Self::DocumentDownload => "document_download",
            Self::MeetingAction => "meeting_action",
            Self::ComplianceAction => "compliance_action",
            Self::SettingsChange => "settings_change",
            Self::UserDataChange => "user_data_change",
            Self::VotingAction => "voting_action",
            Self::FinancialTransaction => "financial_transaction",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
            Self::RoleChange => "role_change",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::MessageSend => "message_send",
        }
    }

    /// Parse from the stored string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page_visit" => Some(Self::PageVisit),
            "data_view" => Some(Self::DataView),
            "data_modification" => Some(Self::DataModification),
            "data_export" => Some(Self::DataExport),
            "document_upload" => Some(Self::DocumentUpload),
            "document_delete" => Some(Self::DocumentDelete),
            "document_download" => Some(Self::DocumentDownload),
            "meeting_action" => Some(Self::MeetingAction),
            "compliance_action" => Some(Self::ComplianceAction),
            "settings_change" => Some(Self::SettingsChange),
            "user_data_change" => Some(Self::UserDataChange),
            "voting_action" => Some(Self::VotingAction),
            "financial_transaction" => Some(Self::FinancialTransaction),
            "password_reset" => Some(Self::PasswordReset),
            "email_change" => Some(Self::EmailChange),
            "role_change" => Some(Self::RoleChange),
            "session_start" => Some(Self::SessionStart),
            "session_end" => Some(Self::SessionEnd),
            "message_send" => Some(Self::MessageSend),
            _ => None,
        }
    }
}

/// Coarse severity classification of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine read-type interaction
    Low,
    /// Ordinary state change
    Medium,
    /// Destructive or sensitive change
    High,
    /// Security-sensitive change
    Critical,
}

impl RiskLevel {
    /// String form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from the stored string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// One audited interaction performed during an impersonation session.
///
/// Records are immutable once written; every state-changing action performed
/// while impersonating produces exactly one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditedAction {
    /// Unique action identifier
    pub id: Uuid,
    /// Session this action belongs to
    pub session_id: String,
    /// Admin who performed the action
    pub admin_id: Uuid,
    /// User being impersonated when the action was performed
    pub target_user_id: Uuid,
    /// Kind of interaction
    pub action_type: ActionType,
    /// Human-readable description
    pub description: String,
    /// Page or screen where the action occurred
    pub page_context: Option<String>,
    /// Kind of record affected, if any
    pub affected_data_type: Option<String>,
    /// Identifier of the affected record, if any
    pub affected_record_id: Option<String>,
    /// Snapshot of values before a modification
    pub old_values: Option<serde_json::Value>,
    /// Snapshot of values after a modification
    pub new_values: Option<serde_json::Value>,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// When the action was performed
    pub performed_at: DateTime<Utc>,
    /// Whether the action requires out-of-band approval
    pub requires_approval: bool,
}

impl AuditedAction {
    /// Create an action record; risk is derived from the action type
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        admin_id: Uuid,
        target_user_id: Uuid,
        action_type: ActionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            admin_id,
            target_user_id,
            action_type,
            description: description.into(),
            page_context: None,
            affected_data_type: None,
            affected_record_id: None,
            old_values: None,
            new_values: None,
            risk_level: action_type.risk_level(),
            performed_at: Utc::now(),
            requires_approval: matches!(action_type.risk_level(), RiskLevel::Critical),
        }
    }

    /// Attach the page context where the action occurred
    #[must_use]
    pub fn with_page_context(mut self, page_context: impl Into<String>) -> Self {
        self.page_context = Some(page_context.into());
        self
    }

    /// Attach the affected record reference
    #[must_use]
    pub fn with_affected_record(
        mut self,
        data_type: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        self.affected_data_type = Some(data_type.into());
        self.affected_record_id = Some(record_id.into());
        self
    }

    /// Attach before/after snapshots for a modification action
    #[must_use]
    pub fn with_value_change(
        mut self,
        old_values: serde_json::Value,
        new_values: serde_json::Value,
    ) -> Self {
        self.old_values = Some(old_values);
        self.new_values = Some(new_values);
        self
    }

    /// Override the derived risk level (forced terminations are always high)
    #[must_use]
    pub const fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Description used for the mandatory session-start record
    #[must_use]
    pub fn session_start_description(reason: ImpersonationReason) -> String {
        format!(
            "Impersonation session started (reason: {})",
            reason.display_name()
        )
    }
}

/// Kind of security alert raised by the audit layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Daily or duration limit crossed
    SessionLimitExceeded,
    /// Behavior pattern flagged as suspicious
    SuspiciousActivity,
    /// Action forbidden by the grant was attempted or logged
    UnauthorizedAction,
    /// Session was force-ended by a timer
    SessionTimeout,
    /// Concurrent session limit reached
    ConcurrentSessions,
}

impl AlertType {
    /// String form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionLimitExceeded => "session_limit_exceeded",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::UnauthorizedAction => "unauthorized_action",
            Self::SessionTimeout => "session_timeout",
            Self::ConcurrentSessions => "concurrent_sessions",
        }
    }
}

/// Severity of a security alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Low,
    /// Needs attention
    Medium,
    /// Needs prompt attention
    High,
    /// Needs immediate attention
    Critical,
}

impl AlertSeverity {
    /// String form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Alert raised when a risk threshold is crossed; resolved out of band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Unique alert identifier
    pub id: Uuid,
    /// Kind of alert
    pub alert_type: AlertType,
    /// Severity
    pub severity: AlertSeverity,
    /// Human-readable message
    pub message: String,
    /// Session that triggered the alert, if any
    pub session_id: Option<String>,
    /// Admin involved, if known
    pub admin_id: Option<Uuid>,
    /// Target user involved, if known
    pub target_user_id: Option<Uuid>,
    /// When the condition was detected
    pub detected_at: DateTime<Utc>,
    /// Whether the alert has been resolved
    pub resolved: bool,
}

impl SecurityAlert {
    /// Create a new unresolved alert
    #[must_use]
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            message: message.into(),
            session_id: None,
            admin_id: None,
            target_user_id: None,
            detected_at: Utc::now(),
            resolved: false,
        }
    }

    /// Attach the session/admin/target the alert concerns
    #[must_use]
    pub fn with_session(
        mut self,
        session_id: impl Into<String>,
        admin_id: Uuid,
        target_user_id: Uuid,
    ) -> Self {
        self.session_id = Some(session_id.into());
        self.admin_id = Some(admin_id);
        self.target_user_id = Some(target_user_id);
        self
    }
}
