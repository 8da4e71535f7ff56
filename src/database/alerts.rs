// ABOUTME: Security alert storage, written best-effort by the audit layer
// ABOUTME: Alerts are resolved out of band by a separate process
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::Database;
use propman_core::errors::{AppError, AppResult};
use propman_core::permissions::SecurityAlert;
use sqlx::Row;

impl Database {
    pub(crate) async fn migrate_alerts(&self) -> AppResult<()> {
        self.execute_schema(&[r"
            CREATE TABLE IF NOT EXISTS security_alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                session_id TEXT,
                admin_id TEXT,
                target_user_id TEXT,
                detected_at TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            )
            "])
        .await
    }

    /// Insert a security alert
    pub async fn create_alert(&self, alert: &SecurityAlert) -> AppResult<()> {
        let query = r"
            INSERT INTO security_alerts (
                id, alert_type, severity, message,
                session_id, admin_id, target_user_id, detected_at, resolved
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(alert.id.to_string())
            .bind(alert.alert_type.as_str())
            .bind(alert.severity.as_str())
            .bind(&alert.message)
            .bind(&alert.session_id)
            .bind(alert.admin_id.map(|id| id.to_string()))
            .bind(alert.target_user_id.map(|id| id.to_string()))
            .bind(alert.detected_at.to_rfc3339())
            .bind(alert.resolved)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to create security alert: {e}")))?;

        Ok(())
    }

    /// Number of stored alerts (used by tests)
    pub async fn count_alerts(&self) -> AppResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM security_alerts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count alerts: {e}")))?;

        Ok(row.get::<i64, _>("total").max(0) as u64)
    }
}
