// ABOUTME: Per-action audit records, children of impersonation sessions
// ABOUTME: Rows are immutable once written; the table is append-only
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::grants::parse_uuid;
use super::users::parse_timestamp;
use super::Database;
use propman_core::errors::{AppError, AppResult};
use propman_core::permissions::{ActionType, AuditedAction, RiskLevel};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Database {
    pub(crate) async fn migrate_actions(&self) -> AppResult<()> {
        self.execute_schema(&[
            r"
            CREATE TABLE IF NOT EXISTS impersonation_actions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES impersonation_sessions(id),
                admin_id TEXT NOT NULL,
                target_user_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                description TEXT NOT NULL,
                page_context TEXT,
                affected_data_type TEXT,
                affected_record_id TEXT,
                old_values TEXT,
                new_values TEXT,
                risk_level TEXT NOT NULL,
                performed_at TEXT NOT NULL,
                requires_approval INTEGER NOT NULL DEFAULT 0
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_actions_session ON impersonation_actions(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_actions_performed ON impersonation_actions(performed_at)",
        ])
        .await
    }

    /// Append an action record to the audit log
    pub async fn create_action(&self, action: &AuditedAction) -> AppResult<()> {
        let query = r"
            INSERT INTO impersonation_actions (
                id, session_id, admin_id, target_user_id, action_type, description,
                page_context, affected_data_type, affected_record_id,
                old_values, new_values, risk_level, performed_at, requires_approval
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(action.id.to_string())
            .bind(&action.session_id)
            .bind(action.admin_id.to_string())
            .bind(action.target_user_id.to_string())
            .bind(action.action_type.as_str())
            .bind(&action.description)
            .bind(&action.page_context)
            .bind(&action.affected_data_type)
            .bind(&action.affected_record_id)
            .bind(encode_values(action.old_values.as_ref())?)
            .bind(encode_values(action.new_values.as_ref())?)
            .bind(action.risk_level.as_str())
            .bind(action.performed_at.to_rfc3339())
            .bind(action.requires_approval)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to record action: {e}")))?;

        Ok(())
    }

    /// Number of actions the operator performed during a session.
    ///
    /// The automatic session lifecycle records are bookkeeping, not operator
    /// activity, so they are excluded from the count.
    pub async fn count_session_actions(&self, session_id: &str) -> AppResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM impersonation_actions
             WHERE session_id = ? AND action_type NOT IN ('session_start', 'session_end')",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to count session actions: {e}")))?;

        Ok(row.get::<i64, _>("total").max(0) as u64)
    }

    /// Total number of action records (used by tests to verify no-op paths)
    pub async fn count_all_actions(&self) -> AppResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM impersonation_actions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count actions: {e}")))?;

        Ok(row.get::<i64, _>("total").max(0) as u64)
    }

    /// All actions recorded for a session, oldest first
    pub async fn get_session_actions(&self, session_id: &str) -> AppResult<Vec<AuditedAction>> {
        let query = r"
            SELECT id, session_id, admin_id, target_user_id, action_type, description,
                   page_context, affected_data_type, affected_record_id,
                   old_values, new_values, risk_level, performed_at, requires_approval
            FROM impersonation_actions
            WHERE session_id = ? ORDER BY performed_at ASC
        ";

        let rows = sqlx::query(query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list session actions: {e}")))?;

        rows.iter().map(Self::row_to_action).collect()
    }

    /// Convert database row to `AuditedAction`
    fn row_to_action(row: &SqliteRow) -> AppResult<AuditedAction> {
        let action_type: String = row.get("action_type");
        let risk_level: String = row.get("risk_level");
        let old_values: Option<String> = row.get("old_values");
        let new_values: Option<String> = row.get("new_values");
        let performed_at: String = row.get("performed_at");

        Ok(AuditedAction {
            id: parse_uuid(&row.get::<String, _>("id"), "action id")?,
            session_id: row.get("session_id"),
            admin_id: parse_uuid(&row.get::<String, _>("admin_id"), "admin_id")?,
            target_user_id: parse_uuid(&row.get::<String, _>("target_user_id"), "target_user_id")?,
            action_type: ActionType::parse(&action_type).ok_or_else(|| {
                AppError::database(format!("Unknown action type: {action_type}"))
            })?,
            description: row.get("description"),
            page_context: row.get("page_context"),
            affected_data_type: row.get("affected_data_type"),
            affected_record_id: row.get("affected_record_id"),
            old_values: decode_values(old_values.as_deref())?,
            new_values: decode_values(new_values.as_deref())?,
            risk_level: RiskLevel::parse(&risk_level)
                .ok_or_else(|| AppError::database(format!("Unknown risk level: {risk_level}")))?,
            performed_at: parse_timestamp(&performed_at, "performed_at")?,
            requires_approval: row.get("requires_approval"),
        })
    }
}

fn encode_values(values: Option<&serde_json::Value>) -> AppResult<Option<String>> {
    values
        .map(|v| {
            serde_json::to_string(v)
                .map_err(|e| AppError::database(format!("Failed to encode action values: {e}")))
        })
        .transpose()
}

fn decode_values(values: Option<&str>) -> AppResult<Option<serde_json::Value>> {
    values
        .map(|v| {
            serde_json::from_str(v)
                .map_err(|e| AppError::database(format!("Invalid action values payload: {e}")))
        })
        .transpose()
}
