// ABOUTME: Read-side audit routes - session log, per-session actions, reporting summary
// ABOUTME: Super admin only; purely read operations over the audit trail
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Audit Routes
//!
//! Endpoints for reviewing the impersonation audit trail.

use crate::database::SessionFilters;
use crate::routes::ServerResources;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use propman_core::errors::AppError;
use propman_core::permissions::{ImpersonationSession, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Query parameters for the session log
#[derive(Deserialize, Default)]
struct SessionLogQuery {
    admin_id: Option<Uuid>,
    target_user_id: Option<Uuid>,
    status: Option<String>,
    started_after: Option<DateTime<Utc>>,
    started_before: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

/// Query parameters for the reporting summary
#[derive(Deserialize, Default)]
struct SummaryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    admin_id: Option<Uuid>,
}

/// Response for the session log
#[derive(Serialize)]
struct SessionLogResponse {
    sessions: Vec<ImpersonationSession>,
    total_count: usize,
}

/// Audit review routes, super admin only
pub struct AuditRoutes;

impl AuditRoutes {
    /// Create all audit routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/admin/audit/sessions", get(Self::handle_list_sessions))
            .route(
                "/api/admin/audit/sessions/:session_id",
                get(Self::handle_get_session),
            )
            .route(
                "/api/admin/audit/sessions/:session_id/actions",
                get(Self::handle_session_actions),
            )
            .route("/api/admin/audit/summary", get(Self::handle_summary))
            .with_state(resources)
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers.get("authorization").and_then(|h| h.to_str().ok())
    }

    async fn handle_list_sessions(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<SessionLogQuery>,
    ) -> Result<Response, AppError> {
        resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let status = query
            .status
            .as_deref()
            .map(|raw| {
                SessionStatus::parse(raw)
                    .ok_or_else(|| AppError::invalid_input(format!("Unknown status: {raw}")))
            })
            .transpose()?;
        let filters = SessionFilters {
            admin_id: query.admin_id,
            target_user_id: query.target_user_id,
            status,
            started_after: query.started_after,
            started_before: query.started_before,
        };

        let sessions = resources
            .audit
            .get_audit_log(&filters, query.limit.unwrap_or(100).clamp(1, 1000))
            .await?;
        let total_count = sessions.len();

        Ok((
            StatusCode::OK,
            Json(SessionLogResponse {
                sessions,
                total_count,
            }),
        )
            .into_response())
    }

    async fn handle_get_session(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(session_id): Path<String>,
    ) -> Result<Response, AppError> {
        resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let session = resources
            .audit
            .get_session(&session_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No session with id {session_id}")))?;

        Ok((StatusCode::OK, Json(session)).into_response())
    }

    async fn handle_session_actions(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(session_id): Path<String>,
    ) -> Result<Response, AppError> {
        resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let actions = resources.audit.get_session_actions(&session_id).await?;
        Ok((StatusCode::OK, Json(actions)).into_response())
    }

    async fn handle_summary(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<SummaryQuery>,
    ) -> Result<Response, AppError> {
        resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let to = query.to.unwrap_or_else(Utc::now);
        let from = query.from.unwrap_or(to - Duration::days(30));
        let summary = resources
            .audit
            .get_audit_summary(from, to, query.admin_id)
            .await?;

        Ok((StatusCode::OK, Json(summary)).into_response())
    }
}
