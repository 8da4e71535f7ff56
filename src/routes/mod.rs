// ABOUTME: Route organization and the shared resource container handlers borrow from
// ABOUTME: Thin handlers only - policy lives in the orchestrator and audit service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Route module for the impersonation server
//!
//! Each domain module contains only route definitions and thin handler
//! functions that delegate to the service layer.

/// Audit log and reporting routes
pub mod audit;
/// Impersonation lifecycle routes for super admins
pub mod impersonation;

pub use audit::AuditRoutes;
pub use impersonation::ImpersonationRoutes;

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::database::Database;
use crate::impersonation::{
    ImpersonationOrchestrator, SafetyMonitor, SecurityValidator, SessionStateRegistry,
};
use crate::audit::AuditService;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Centralized resource container for dependency injection.
///
/// Holds all shared server resources so handlers never recreate expensive
/// objects or thread individual Arcs through call chains.
pub struct ServerResources {
    pub database: Arc<Database>,
    pub auth_manager: Arc<AuthManager>,
    pub audit: Arc<AuditService>,
    pub registry: Arc<SessionStateRegistry>,
    pub monitor: SafetyMonitor,
    pub orchestrator: ImpersonationOrchestrator,
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Wire up the resource graph.
    ///
    /// The audit service, registry, and monitor are built by the caller since
    /// the monitor's event stream has to be taken before the resources are
    /// shared.
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        audit: Arc<AuditService>,
        registry: Arc<SessionStateRegistry>,
        monitor: SafetyMonitor,
        config: ServerConfig,
    ) -> Self {
        let orchestrator = ImpersonationOrchestrator::new(
            Arc::clone(&audit),
            SecurityValidator::new(Arc::clone(&audit)),
            Arc::clone(&registry),
            monitor.clone(),
        );

        Self {
            auth_manager: Arc::new(AuthManager::new(Arc::clone(&database))),
            database,
            audit,
            registry,
            monitor,
            orchestrator,
            config: Arc::new(config),
        }
    }

    /// Assemble the full application router
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .merge(ImpersonationRoutes::routes(Arc::clone(self)))
            .merge(AuditRoutes::routes(Arc::clone(self)))
            .layer(TraceLayer::new_for_http())
    }
}
