// ABOUTME: Impersonation session audit records - append-only, never deleted
// ABOUTME: A partial unique index makes the insert the serialization point for the active-pair invariant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::grants::parse_uuid;
use super::users::parse_timestamp;
use super::Database;
use chrono::{DateTime, Utc};
use propman_core::errors::{AppError, AppResult};
use propman_core::models::UserRole;
use propman_core::permissions::{
    EndReason, ImpersonationReason, ImpersonationSession, SessionStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Filters for listing session audit records
#[derive(Debug, Clone, Default)]
pub struct SessionFilters {
    /// Restrict to one admin
    pub admin_id: Option<Uuid>,
    /// Restrict to one target user
    pub target_user_id: Option<Uuid>,
    /// Restrict to one lifecycle status
    pub status: Option<SessionStatus>,
    /// Started on or after
    pub started_after: Option<DateTime<Utc>>,
    /// Started on or before
    pub started_before: Option<DateTime<Utc>>,
}

impl Database {
    pub(crate) async fn migrate_sessions(&self) -> AppResult<()> {
        self.execute_schema(&[
            r"
            CREATE TABLE IF NOT EXISTS impersonation_sessions (
                id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL,
                admin_email TEXT NOT NULL,
                target_user_id TEXT NOT NULL,
                target_email TEXT NOT NULL,
                target_role TEXT NOT NULL,
                target_building_id TEXT,
                reason TEXT NOT NULL,
                additional_notes TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT NOT NULL DEFAULT 'active'
            )
            ",
            // Two near-simultaneous starts for the same pair race the insert;
            // the losing insert's constraint violation is the authoritative
            // rejection.
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_pair
            ON impersonation_sessions(admin_id, target_user_id)
            WHERE status = 'active'
            ",
            "CREATE INDEX IF NOT EXISTS idx_sessions_admin ON impersonation_sessions(admin_id, started_at)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON impersonation_sessions(status)",
        ])
        .await
    }

    /// Insert a new session record.
    ///
    /// Returns a conflict error if an active session already exists for the
    /// same (admin, target) pair.
    pub async fn create_session(&self, session: &ImpersonationSession) -> AppResult<()> {
        let query = r"
            INSERT INTO impersonation_sessions (
                id, admin_id, admin_email, target_user_id, target_email,
                target_role, target_building_id, reason, additional_notes,
                started_at, ended_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(&session.id)
            .bind(session.admin_id.to_string())
            .bind(&session.admin_email)
            .bind(session.target_user_id.to_string())
            .bind(&session.target_email)
            .bind(session.target_role.as_str())
            .bind(session.target_building_id.map(|id| id.to_string()))
            .bind(encode_reason(session.reason))
            .bind(&session.additional_notes)
            .bind(session.started_at.to_rfc3339())
            .bind(session.ended_at.map(|dt| dt.to_rfc3339()))
            .bind(session.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
                {
                    AppError::conflict("An active session already exists for this admin and target")
                } else {
                    AppError::database(format!("Failed to create session: {e}"))
                }
            })?;

        Ok(())
    }

    /// Get a session by ID
    pub async fn get_session(&self, session_id: &str) -> AppResult<Option<ImpersonationSession>> {
        let row = sqlx::query(&format!("{SESSION_SELECT} WHERE id = ?"))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get session: {e}")))?;

        row.map(|r| Self::row_to_session(&r)).transpose()
    }

    /// Close a session if it is still active.
    ///
    /// The conditional update is the idempotency gate shared by every
    /// termination path: exactly one caller observes `true`.
    pub async fn end_session_if_active(
        &self,
        session_id: &str,
        reason: EndReason,
        ended_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let query = r"
            UPDATE impersonation_sessions
            SET status = ?, ended_at = ?
            WHERE id = ? AND status = 'active'
        ";

        let result = sqlx::query(query)
            .bind(reason.session_status().as_str())
            .bind(ended_at.to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to end session: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Append end-of-session notes without touching lifecycle columns
    pub async fn append_session_notes(&self, session_id: &str, notes: &str) -> AppResult<()> {
        let query = r"
            UPDATE impersonation_sessions
            SET additional_notes = COALESCE(additional_notes || char(10), '') || ?
            WHERE id = ?
        ";

        sqlx::query(query)
            .bind(notes)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to append session notes: {e}")))?;
        Ok(())
    }

    /// Close all active sessions for an admin; returns how many were closed
    pub async fn end_all_sessions(&self, admin_id: Uuid, reason: EndReason) -> AppResult<u64> {
        let query = r"
            UPDATE impersonation_sessions
            SET status = ?, ended_at = ?
            WHERE admin_id = ? AND status = 'active'
        ";

        let result = sqlx::query(query)
            .bind(reason.session_status().as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(admin_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to end sessions: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Active sessions, optionally restricted to one admin
    pub async fn get_active_sessions(
        &self,
        admin_id: Option<Uuid>,
    ) -> AppResult<Vec<ImpersonationSession>> {
        let rows = if let Some(admin_id) = admin_id {
            sqlx::query(&format!(
                "{SESSION_SELECT} WHERE status = 'active' AND admin_id = ? ORDER BY started_at DESC"
            ))
            .bind(admin_id.to_string())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "{SESSION_SELECT} WHERE status = 'active' ORDER BY started_at DESC"
            ))
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::database(format!("Failed to list active sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    /// Number of active sessions held by an admin
    pub async fn count_active_sessions(&self, admin_id: Uuid) -> AppResult<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM impersonation_sessions WHERE admin_id = ? AND status = 'active'",
        )
        .bind(admin_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to count active sessions: {e}")))?;

        Ok(row.get::<i64, _>("total").max(0) as u32)
    }

    /// Number of sessions an admin started since the given instant.
    ///
    /// The daily limit is measured from UTC midnight, not the operator's
    /// local day.
    pub async fn count_sessions_since(
        &self,
        admin_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM impersonation_sessions WHERE admin_id = ? AND started_at >= ?",
        )
        .bind(admin_id.to_string())
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to count daily sessions: {e}")))?;

        Ok(row.get::<i64, _>("total").max(0) as u32)
    }

    /// Most recent sessions for an admin, newest first
    pub async fn recent_sessions(
        &self,
        admin_id: Uuid,
        limit: u32,
    ) -> AppResult<Vec<ImpersonationSession>> {
        let rows = sqlx::query(&format!(
            "{SESSION_SELECT} WHERE admin_id = ? ORDER BY started_at DESC LIMIT ?"
        ))
        .bind(admin_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list recent sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    /// List session audit records with filters, newest first
    pub async fn list_sessions(
        &self,
        filters: &SessionFilters,
        limit: u32,
    ) -> AppResult<Vec<ImpersonationSession>> {
        let mut query = format!("{SESSION_SELECT} WHERE 1=1");
        if filters.admin_id.is_some() {
            query.push_str(" AND admin_id = ?");
        }
        if filters.target_user_id.is_some() {
            query.push_str(" AND target_user_id = ?");
        }
        if filters.status.is_some() {
            query.push_str(" AND status = ?");
        }
        if filters.started_after.is_some() {
            query.push_str(" AND started_at >= ?");
        }
        if filters.started_before.is_some() {
            query.push_str(" AND started_at <= ?");
        }
        query.push_str(" ORDER BY started_at DESC LIMIT ?");

        let mut sql_query = sqlx::query(&query);
        if let Some(id) = filters.admin_id {
            sql_query = sql_query.bind(id.to_string());
        }
        if let Some(id) = filters.target_user_id {
            sql_query = sql_query.bind(id.to_string());
        }
        if let Some(status) = filters.status {
            sql_query = sql_query.bind(status.as_str());
        }
        if let Some(after) = filters.started_after {
            sql_query = sql_query.bind(after.to_rfc3339());
        }
        if let Some(before) = filters.started_before {
            sql_query = sql_query.bind(before.to_rfc3339());
        }
        sql_query = sql_query.bind(i64::from(limit));

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    /// Convert database row to `ImpersonationSession`
    fn row_to_session(row: &SqliteRow) -> AppResult<ImpersonationSession> {
        let id: String = row.get("id");
        let admin_id: String = row.get("admin_id");
        let admin_email: String = row.get("admin_email");
        let target_user_id: String = row.get("target_user_id");
        let target_email: String = row.get("target_email");
        let target_role: String = row.get("target_role");
        let target_building_id: Option<String> = row.get("target_building_id");
        let reason: String = row.get("reason");
        let additional_notes: Option<String> = row.get("additional_notes");
        let started_at: String = row.get("started_at");
        let ended_at: Option<String> = row.get("ended_at");
        let status: String = row.get("status");

        Ok(ImpersonationSession {
            id,
            admin_id: parse_uuid(&admin_id, "admin_id")?,
            admin_email,
            target_user_id: parse_uuid(&target_user_id, "target_user_id")?,
            target_email,
            target_role: UserRole::parse(&target_role)
                .ok_or_else(|| AppError::database(format!("Unknown target role: {target_role}")))?,
            target_building_id: target_building_id
                .map(|s| parse_uuid(&s, "target_building_id"))
                .transpose()?,
            reason: decode_reason(&reason)?,
            additional_notes,
            started_at: parse_timestamp(&started_at, "started_at")?,
            ended_at: ended_at
                .map(|s| parse_timestamp(&s, "ended_at"))
                .transpose()?,
            status: SessionStatus::parse(&status)
                .ok_or_else(|| AppError::database(format!("Unknown session status: {status}")))?,
        })
    }
}

const SESSION_SELECT: &str = r"
    SELECT id, admin_id, admin_email, target_user_id, target_email,
           target_role, target_building_id, reason, additional_notes,
           started_at, ended_at, status
    FROM impersonation_sessions
";

fn encode_reason(reason: ImpersonationReason) -> String {
    // serde's snake_case form, quoted; strip the quotes for readability
    serde_json::to_string(&reason)
        .unwrap_or_default()
        .trim_matches('"')
        .to_owned()
}

fn decode_reason(value: &str) -> AppResult<ImpersonationReason> {
    serde_json::from_str(&format!("\"{value}\""))
        .map_err(|e| AppError::database(format!("Unknown impersonation reason {value}: {e}")))
}
