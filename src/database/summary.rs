// ABOUTME: Read-side aggregate queries feeding the audit summary rollup
// ABOUTME: Pure reporting - no mutation of the audit log
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::Database;
use chrono::{DateTime, Utc};
use propman_core::errors::{AppError, AppResult};
use propman_core::permissions::{ActionType, RiskLevel};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Action counts by type within a window, optionally for one admin
    pub async fn count_actions_by_type(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        admin_id: Option<Uuid>,
    ) -> AppResult<Vec<(ActionType, u64)>> {
        let rows = self
            .grouped_action_counts("action_type", from, to, admin_id)
            .await?;

        rows.into_iter()
            .map(|(key, count)| {
                ActionType::parse(&key)
                    .map(|t| (t, count))
                    .ok_or_else(|| AppError::database(format!("Unknown action type: {key}")))
            })
            .collect()
    }

    /// Action counts by risk level within a window, optionally for one admin
    pub async fn count_actions_by_risk(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        admin_id: Option<Uuid>,
    ) -> AppResult<Vec<(RiskLevel, u64)>> {
        let rows = self
            .grouped_action_counts("risk_level", from, to, admin_id)
            .await?;

        rows.into_iter()
            .map(|(key, count)| {
                RiskLevel::parse(&key)
                    .map(|r| (r, count))
                    .ok_or_else(|| AppError::database(format!("Unknown risk level: {key}")))
            })
            .collect()
    }

    async fn grouped_action_counts(
        &self,
        column: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        admin_id: Option<Uuid>,
    ) -> AppResult<Vec<(String, u64)>> {
        let mut query = format!(
            "SELECT {column} AS grouping, COUNT(*) AS total FROM impersonation_actions \
             WHERE performed_at >= ? AND performed_at <= ?"
        );
        if admin_id.is_some() {
            query.push_str(" AND admin_id = ?");
        }
        query.push_str(&format!(" GROUP BY {column} ORDER BY total DESC"));

        let mut sql_query = sqlx::query(&query)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339());
        if let Some(id) = admin_id {
            sql_query = sql_query.bind(id.to_string());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to aggregate actions: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("grouping"),
                    row.get::<i64, _>("total").max(0) as u64,
                )
            })
            .collect())
    }
}
