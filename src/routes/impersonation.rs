// ABOUTME: Impersonation lifecycle routes - start, end, status, activity, extension, user search
// ABOUTME: Super admin only; all policy decisions are delegated to the orchestrator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Impersonation Routes
//!
//! Endpoints for super admin users to impersonate other users. All
//! impersonation activity is written to the audit log.

use crate::context::ActorContext;
use crate::impersonation::{rehydrate, ImpersonationRequest};
use crate::database::UserSearchFilters;
use crate::routes::ServerResources;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use propman_core::errors::{AppError, AppResult};
use propman_core::models::UserRole;
use propman_core::permissions::{ActionType, EndReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for ending the caller's current session
#[derive(Deserialize)]
struct EndRequestBody {
    /// Termination reason; defaults to a manual end
    reason: Option<EndReason>,
    /// Free-text notes appended to the session record
    notes: Option<String>,
}

/// Request body for reporting page visibility
#[derive(Deserialize)]
struct VisibilityBody {
    hidden: bool,
}

/// Request body for requesting more session time
#[derive(Deserialize)]
struct ExtendBody {
    minutes: u32,
}

/// Request body for logging an audited action
#[derive(Deserialize)]
struct LogActionBody {
    action_type: ActionType,
    description: String,
    page_context: Option<String>,
}

/// Query parameters for the impersonation picker search
#[derive(Deserialize, Default)]
struct SearchQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    role: Option<String>,
    email: Option<String>,
    building_name: Option<String>,
    registered_after: Option<DateTime<Utc>>,
    registered_before: Option<DateTime<Utc>>,
    last_login_after: Option<DateTime<Utc>>,
    last_login_before: Option<DateTime<Utc>>,
}

/// Current impersonation status for the caller
#[derive(Serialize)]
struct StatusResponse {
    is_impersonating: bool,
    context: ActorContext,
    session: Option<crate::audit::SessionValidity>,
}

/// Generic success envelope for mutation endpoints
#[derive(Serialize)]
struct AckResponse {
    success: bool,
    message: String,
}

/// Impersonation routes, super admin only
pub struct ImpersonationRoutes;

impl ImpersonationRoutes {
    /// Create all impersonation routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/admin/impersonate", post(Self::handle_start))
            .route("/api/admin/impersonate/end", post(Self::handle_end))
            .route("/api/admin/impersonate/status", get(Self::handle_status))
            .route("/api/admin/impersonate/activity", post(Self::handle_activity))
            .route(
                "/api/admin/impersonate/visibility",
                post(Self::handle_visibility),
            )
            .route("/api/admin/impersonate/extend", post(Self::handle_extend))
            .route("/api/admin/impersonate/actions", post(Self::handle_log_action))
            .route("/api/admin/impersonate/users", get(Self::handle_search_users))
            .with_state(resources)
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers.get("authorization").and_then(|h| h.to_str().ok())
    }

    async fn handle_start(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<ImpersonationRequest>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let outcome = resources
            .orchestrator
            .start_impersonation(&admin, &request)
            .await?;

        Ok((StatusCode::OK, Json(outcome)).into_response())
    }

    async fn handle_end(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<EndRequestBody>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let session_id = Self::current_session_id(&resources, admin.id).await?;
        let outcome = resources
            .orchestrator
            .end_impersonation(
                &session_id,
                body.reason.unwrap_or(EndReason::Manual),
                body.notes.as_deref(),
            )
            .await?;

        Ok((StatusCode::OK, Json(outcome)).into_response())
    }

    async fn handle_status(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        // A fresh page load has no in-memory state yet; restore it from the
        // durable record while the session is inside its ceiling
        if !resources.registry.is_impersonating(admin.id) {
            rehydrate(
                &resources.registry,
                &resources.audit,
                &resources.monitor,
                &admin,
            )
            .await?;
        }

        let context = ActorContext::resolve(&resources.registry, admin.clone());
        let session = resources
            .orchestrator
            .check_session_status(admin.id)
            .await?;

        Ok((
            StatusCode::OK,
            Json(StatusResponse {
                is_impersonating: context.is_impersonating(),
                context,
                session,
            }),
        )
            .into_response())
    }

    async fn handle_activity(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        if let Some(session_id) = resources.registry.session_id(admin.id) {
            resources.monitor.record_activity(&session_id);
        }
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_visibility(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<VisibilityBody>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        if let Some(session_id) = resources.registry.session_id(admin.id) {
            resources.monitor.set_visibility(&session_id, body.hidden);
        }
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_extend(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<ExtendBody>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let session_id = Self::current_session_id(&resources, admin.id).await?;
        let granted = resources.monitor.request_extension(&session_id, body.minutes)?;

        Ok((
            StatusCode::OK,
            Json(AckResponse {
                success: true,
                message: format!("Session extended by {granted} minutes"),
            }),
        )
            .into_response())
    }

    async fn handle_log_action(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<LogActionBody>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        // Deliberately a silent no-op outside a session
        resources
            .orchestrator
            .log_action(admin.id, body.action_type, body.description, body.page_context)
            .await;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_search_users(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<SearchQuery>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .auth_manager
            .authenticate_super_admin(Self::bearer(&headers))
            .await?;

        let roles = match &query.role {
            None => Vec::new(),
            Some(raw) => {
                let role = UserRole::parse(raw)
                    .ok_or_else(|| AppError::invalid_input(format!("Unknown role: {raw}")))?;
                vec![role]
            }
        };
        let filters = UserSearchFilters {
            roles,
            building_ids: None,
            email_contains: query.email.clone(),
            building_name_contains: query.building_name.clone(),
            registered_after: query.registered_after,
            registered_before: query.registered_before,
            last_login_after: query.last_login_after,
            last_login_before: query.last_login_before,
        };

        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
        let result = resources
            .orchestrator
            .search_users(admin.id, &filters, page, page_size)
            .await?;

        Ok((StatusCode::OK, Json(result)).into_response())
    }

    async fn current_session_id(
        resources: &Arc<ServerResources>,
        admin_id: uuid::Uuid,
    ) -> AppResult<String> {
        if let Some(session_id) = resources.registry.session_id(admin_id) {
            return Ok(session_id);
        }
        // Fall back to the durable record so an end call after a restart works
        resources
            .audit
            .get_active_sessions(Some(admin_id))
            .await?
            .into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| AppError::not_found("No active impersonation session found"))
    }
}
