// ABOUTME: Permission store reads for impersonation grants
// ABOUTME: Grants are written by a separate administrative process; this core only reads them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::users::parse_timestamp;
use super::Database;
use propman_core::errors::{AppError, AppResult};
use propman_core::permissions::ImpersonationGrant;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    pub(crate) async fn migrate_grants(&self) -> AppResult<()> {
        self.execute_schema(&[r"
            CREATE TABLE IF NOT EXISTS impersonation_grants (
                admin_id TEXT PRIMARY KEY,
                allowed_target_roles TEXT NOT NULL,
                allowed_building_ids TEXT,
                max_session_duration_minutes INTEGER NOT NULL,
                max_daily_sessions INTEGER NOT NULL,
                max_concurrent_sessions INTEGER NOT NULL,
                allowed_actions TEXT NOT NULL,
                restricted_actions TEXT NOT NULL,
                granted_by TEXT NOT NULL,
                granted_at TEXT NOT NULL,
                expires_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "])
        .await
    }

    /// Store a grant. Used by the grant administration process and test seeding;
    /// the impersonation core itself never writes grants.
    pub async fn upsert_grant(&self, grant: &ImpersonationGrant) -> AppResult<()> {
        let query = r"
            INSERT OR REPLACE INTO impersonation_grants (
                admin_id, allowed_target_roles, allowed_building_ids,
                max_session_duration_minutes, max_daily_sessions, max_concurrent_sessions,
                allowed_actions, restricted_actions,
                granted_by, granted_at, expires_at, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(grant.admin_id.to_string())
            .bind(encode_json(&grant.allowed_target_roles)?)
            .bind(
                grant
                    .allowed_building_ids
                    .as_ref()
                    .map(encode_json)
                    .transpose()?,
            )
            .bind(i64::from(grant.max_session_duration_minutes))
            .bind(i64::from(grant.max_daily_sessions))
            .bind(i64::from(grant.max_concurrent_sessions))
            .bind(encode_json(&grant.allowed_actions)?)
            .bind(encode_json(&grant.restricted_actions)?)
            .bind(grant.granted_by.to_string())
            .bind(grant.granted_at.to_rfc3339())
            .bind(grant.expires_at.map(|dt| dt.to_rfc3339()))
            .bind(grant.is_active)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to store grant: {e}")))?;

        Ok(())
    }

    /// Get the impersonation grant for an admin, if one exists
    pub async fn get_grant(&self, admin_id: Uuid) -> AppResult<Option<ImpersonationGrant>> {
        let query = r"
            SELECT admin_id, allowed_target_roles, allowed_building_ids,
                   max_session_duration_minutes, max_daily_sessions, max_concurrent_sessions,
                   allowed_actions, restricted_actions,
                   granted_by, granted_at, expires_at, is_active
            FROM impersonation_grants WHERE admin_id = ?
        ";

        let row = sqlx::query(query)
            .bind(admin_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get grant: {e}")))?;

        row.map(|r| Self::row_to_grant(&r)).transpose()
    }

    fn row_to_grant(row: &SqliteRow) -> AppResult<ImpersonationGrant> {
        let admin_id: String = row.get("admin_id");
        let allowed_target_roles: String = row.get("allowed_target_roles");
        let allowed_building_ids: Option<String> = row.get("allowed_building_ids");
        let allowed_actions: String = row.get("allowed_actions");
        let restricted_actions: String = row.get("restricted_actions");
        let granted_by: String = row.get("granted_by");
        let granted_at: String = row.get("granted_at");
        let expires_at: Option<String> = row.get("expires_at");

        Ok(ImpersonationGrant {
            admin_id: parse_uuid(&admin_id, "admin_id")?,
            allowed_target_roles: decode_json(&allowed_target_roles, "allowed_target_roles")?,
            allowed_building_ids: allowed_building_ids
                .map(|s| decode_json(&s, "allowed_building_ids"))
                .transpose()?,
            max_session_duration_minutes: row.get::<i64, _>("max_session_duration_minutes") as u32,
            max_daily_sessions: row.get::<i64, _>("max_daily_sessions") as u32,
            max_concurrent_sessions: row.get::<i64, _>("max_concurrent_sessions") as u32,
            allowed_actions: decode_json(&allowed_actions, "allowed_actions")?,
            restricted_actions: decode_json(&restricted_actions, "restricted_actions")?,
            granted_by: parse_uuid(&granted_by, "granted_by")?,
            granted_at: parse_timestamp(&granted_at, "granted_at")?,
            expires_at: expires_at
                .map(|s| parse_timestamp(&s, "expires_at"))
                .transpose()?,
            is_active: row.get("is_active"),
        })
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::database(format!("Failed to encode grant field: {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> AppResult<T> {
    serde_json::from_str(value)
        .map_err(|e| AppError::database(format!("Invalid {column} payload: {e}")))
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::database(format!("Invalid {column} UUID: {e}")))
}
