// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides common database, service, and seed-data helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]
//! Shared test utilities for `propman_server`
//!
//! Common setup functions to reduce duplication across integration tests.

use anyhow::Result;
use chrono::Utc;
use propman_server::{
    audit::AuditService,
    database::Database,
    impersonation::{
        ImpersonationOrchestrator, MonitorEvent, SafetyMonitor, SecurityValidator,
        SessionStateRegistry,
    },
};
use propman_core::models::{User, UserRole};
use propman_core::permissions::{ActionType, ImpersonationGrant, SessionLimits};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Session limits used throughout the tests
pub fn test_limits() -> SessionLimits {
    SessionLimits {
        max_duration_minutes: 60,
        warning_at_minutes: 10,
        inactivity_timeout_minutes: 15,
    }
}

/// In-memory database with migrations applied
pub async fn create_test_database() -> Result<Arc<Database>> {
    init_test_logging();
    Ok(Arc::new(Database::new("sqlite::memory:").await?))
}

/// Audit service over a fresh in-memory database
pub async fn create_test_audit() -> Result<(Arc<Database>, Arc<AuditService>)> {
    let database = create_test_database().await?;
    let audit = Arc::new(AuditService::new(Arc::clone(&database), test_limits()));
    Ok((database, audit))
}

/// The full impersonation stack over one in-memory database
pub struct TestStack {
    pub database: Arc<Database>,
    pub audit: Arc<AuditService>,
    pub registry: Arc<SessionStateRegistry>,
    pub monitor: SafetyMonitor,
    pub events: mpsc::Receiver<MonitorEvent>,
    pub orchestrator: ImpersonationOrchestrator,
}

/// Wire up orchestrator, validator, monitor, and registry for a test
pub async fn create_test_stack() -> Result<TestStack> {
    let (database, audit) = create_test_audit().await?;
    let registry = Arc::new(SessionStateRegistry::new());
    let (monitor, events) = SafetyMonitor::new(Arc::clone(&audit), Arc::clone(&registry));
    let orchestrator = ImpersonationOrchestrator::new(
        Arc::clone(&audit),
        SecurityValidator::new(Arc::clone(&audit)),
        Arc::clone(&registry),
        monitor.clone(),
    );
    Ok(TestStack {
        database,
        audit,
        registry,
        monitor,
        events,
        orchestrator,
    })
}

/// Seed a super admin operator
pub async fn seed_admin(database: &Database) -> Result<User> {
    let mut admin = User::new(
        format!("admin-{}@propman.test", Uuid::new_v4()),
        Some("Test Admin".to_owned()),
        UserRole::SuperAdmin,
    );
    admin.last_login_at = Some(Utc::now());
    database.create_user(&admin).await?;
    Ok(admin)
}

/// Seed a target user with the given role
pub async fn seed_target(database: &Database, role: UserRole) -> Result<User> {
    let mut target = User::new(
        format!("target-{}@propman.test", Uuid::new_v4()),
        Some("Test Target".to_owned()),
        role,
    );
    target.last_login_at = Some(Utc::now());
    database.create_user(&target).await?;
    Ok(target)
}

/// Seed a target user attached to a building
pub async fn seed_target_in_building(
    database: &Database,
    role: UserRole,
    building_id: Uuid,
) -> Result<User> {
    let mut target = User::new(
        format!("target-{}@propman.test", Uuid::new_v4()),
        None,
        role,
    )
    .with_building(building_id, "Maple Court");
    target.last_login_at = Some(Utc::now());
    database.create_user(&target).await?;
    Ok(target)
}

/// Default grant for tests: leaseholders and tenants, one concurrent
/// session, five per day, financial transactions restricted
pub fn default_grant(admin_id: Uuid) -> ImpersonationGrant {
    ImpersonationGrant {
        admin_id,
        allowed_target_roles: vec![UserRole::Leaseholder, UserRole::Tenant],
        allowed_building_ids: None,
        max_session_duration_minutes: 60,
        max_daily_sessions: 5,
        max_concurrent_sessions: 1,
        allowed_actions: vec![ActionType::PageVisit, ActionType::DataView],
        restricted_actions: vec![ActionType::FinancialTransaction],
        granted_by: Uuid::new_v4(),
        granted_at: Utc::now(),
        expires_at: None,
        is_active: true,
    }
}

/// Seed the default grant for an admin
pub async fn seed_grant(database: &Database, admin_id: Uuid) -> Result<ImpersonationGrant> {
    let grant = default_grant(admin_id);
    database.upsert_grant(&grant).await?;
    Ok(grant)
}

/// Seed a customized grant for an admin
pub async fn seed_grant_with(
    database: &Database,
    grant: &ImpersonationGrant,
) -> Result<()> {
    database.upsert_grant(grant).await?;
    Ok(())
}

/// Rewrite a session's start time so duration-based behavior can be tested
/// without waiting
pub async fn backdate_session(
    database: &Database,
    session_id: &str,
    started_at: chrono::DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE impersonation_sessions SET started_at = ? WHERE id = ?")
        .bind(started_at.to_rfc3339())
        .bind(session_id)
        .execute(database.pool())
        .await?;
    Ok(())
}
