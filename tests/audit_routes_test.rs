// ABOUTME: HTTP integration tests for the audit review routes
// ABOUTME: Session log filtering, per-session detail and actions, and the summary report
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use anyhow::Result;
use helpers::axum_test::AxumTestRequest;
use propman_core::models::{User, UserRole};
use propman_core::permissions::{ActionType, AuditedAction, EndReason, ImpersonationReason};
use propman_server::config::{LogLevel, ServerConfig};
use propman_server::routes::ServerResources;
use serde_json::Value;
use std::sync::Arc;

struct AuditHarness {
    resources: Arc<ServerResources>,
    admin: User,
    token: String,
}

impl AuditHarness {
    fn app(&self) -> axum::Router {
        self.resources.router()
    }
}

async fn create_audit_harness() -> Result<AuditHarness> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let config = ServerConfig {
        http_port: 0,
        database_url: "sqlite::memory:".to_owned(),
        log_level: LogLevel::Warn,
        default_limits: common::test_limits(),
    };
    let resources = Arc::new(ServerResources::new(
        Arc::clone(&stack.database),
        Arc::clone(&stack.audit),
        Arc::clone(&stack.registry),
        stack.monitor.clone(),
        config,
    ));
    let token = resources.auth_manager.issue_token(&admin).await?;
    Ok(AuditHarness {
        resources,
        admin,
        token,
    })
}

/// One completed session with a logged action, returning its id
async fn seed_completed_session(harness: &AuditHarness, target: &User) -> Result<String> {
    let session = harness
        .resources
        .audit
        .start_session(
            &harness.admin,
            target,
            ImpersonationReason::CustomerSupport,
            None,
        )
        .await?;
    let action = AuditedAction::new(
        session.id.as_str(),
        harness.admin.id,
        target.id,
        ActionType::DataView,
        "Viewed tenancy record",
    );
    harness.resources.audit.log_action(action, None).await;
    harness
        .resources
        .audit
        .end_session(&session.id, EndReason::Manual, None)
        .await?;
    Ok(session.id)
}

#[tokio::test]
async fn audit_routes_require_a_super_admin() -> Result<()> {
    let harness = create_audit_harness().await?;

    let response = AxumTestRequest::get("/api/admin/audit/sessions")
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 401);

    let tenant = common::seed_target(&harness.resources.database, UserRole::Tenant).await?;
    let token = harness.resources.auth_manager.issue_token(&tenant).await?;
    let response = AxumTestRequest::get("/api/admin/audit/sessions")
        .bearer(&token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 403);
    Ok(())
}

#[tokio::test]
async fn session_log_filters_by_status() -> Result<()> {
    let harness = create_audit_harness().await?;
    let target = common::seed_target(&harness.resources.database, UserRole::Leaseholder).await?;
    let ended_id = seed_completed_session(&harness, &target).await?;
    let active = harness
        .resources
        .audit
        .start_session(
            &harness.admin,
            &target,
            ImpersonationReason::TechnicalIssue,
            None,
        )
        .await?;

    let response = AxumTestRequest::get("/api/admin/audit/sessions?status=active")
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 200);
    let log: Value = response.json();
    assert_eq!(log["total_count"], 1);
    assert_eq!(log["sessions"][0]["id"], active.id);

    let response = AxumTestRequest::get("/api/admin/audit/sessions?status=ended_manually")
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    let log: Value = response.json();
    assert_eq!(log["total_count"], 1);
    assert_eq!(log["sessions"][0]["id"], ended_id);

    // Unknown status values are rejected up front
    let response = AxumTestRequest::get("/api/admin/audit/sessions?status=vaporized")
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn session_detail_and_actions_are_served() -> Result<()> {
    let harness = create_audit_harness().await?;
    let target = common::seed_target(&harness.resources.database, UserRole::Tenant).await?;
    let session_id = seed_completed_session(&harness, &target).await?;

    let response = AxumTestRequest::get(&format!("/api/admin/audit/sessions/{session_id}"))
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 200);
    let session: Value = response.json();
    assert_eq!(session["id"], session_id);
    assert_eq!(session["status"], "ended_manually");

    let response =
        AxumTestRequest::get(&format!("/api/admin/audit/sessions/{session_id}/actions"))
            .bearer(&harness.token)
            .send(harness.app())
            .await;
    assert_eq!(response.status(), 200);
    let actions: Value = response.json();
    let descriptions: Vec<&str> = actions
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["description"].as_str())
        .collect();
    assert!(descriptions.contains(&"Viewed tenancy record"));

    let response = AxumTestRequest::get("/api/admin/audit/sessions/no-such-session")
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[tokio::test]
async fn summary_covers_the_default_window() -> Result<()> {
    let harness = create_audit_harness().await?;
    let target = common::seed_target(&harness.resources.database, UserRole::Leaseholder).await?;
    seed_completed_session(&harness, &target).await?;
    seed_completed_session(&harness, &target).await?;

    let response = AxumTestRequest::get("/api/admin/audit/summary")
        .bearer(&harness.token)
        .send(harness.app())
        .await;
    assert_eq!(response.status(), 200);
    let summary: Value = response.json();
    assert_eq!(summary["total_sessions"], 2);

    let response = AxumTestRequest::get(&format!(
        "/api/admin/audit/summary?admin_id={}",
        uuid::Uuid::new_v4()
    ))
    .bearer(&harness.token)
    .send(harness.app())
    .await;
    let summary: Value = response.json();
    assert_eq!(summary["total_sessions"], 0);
    Ok(())
}
