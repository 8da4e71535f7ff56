// ABOUTME: Integration tests for the impersonation orchestrator policy engine
// ABOUTME: Request validation, start/end lifecycle, scoped search, and action gating
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use propman_core::errors::ErrorCode;
use propman_core::models::UserRole;
use propman_core::permissions::{
    ActionType, EndReason, ImpersonationReason, SessionStatus,
};
use propman_server::database::UserSearchFilters;
use propman_server::impersonation::ImpersonationRequest;
use uuid::Uuid;

fn request_for(target_id: impl ToString) -> ImpersonationRequest {
    ImpersonationRequest {
        target_user_id: target_id.to_string(),
        reason: ImpersonationReason::CustomerSupport,
        additional_notes: None,
    }
}

#[tokio::test]
async fn super_admin_target_is_always_rejected() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let other_admin = common::seed_admin(&stack.database).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let validation = stack
        .orchestrator
        .validate_request(admin.id, &request_for(other_admin.id))
        .await?;
    assert!(!validation.valid);
    assert!(validation.errors[0].contains("Super admin"));

    // The start path rejects too, and leaves no session or action rows
    let actions_before = stack.database.count_all_actions().await?;
    let result = stack
        .orchestrator
        .start_impersonation(&admin, &request_for(other_admin.id))
        .await;
    assert!(result.is_err());
    assert!(stack.audit.get_active_sessions(Some(admin.id)).await?.is_empty());
    assert_eq!(stack.database.count_all_actions().await?, actions_before);
    Ok(())
}

#[tokio::test]
async fn start_flips_state_and_respects_the_concurrency_limit() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let first = common::seed_target(&stack.database, UserRole::Leaseholder).await?;
    let second = common::seed_target(&stack.database, UserRole::Leaseholder).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let outcome = stack
        .orchestrator
        .start_impersonation(&admin, &request_for(first.id))
        .await?;
    assert_eq!(outcome.effective_actor.id, first.id);
    assert_eq!(outcome.max_duration_minutes, 60);
    assert!(stack.registry.is_impersonating(admin.id));

    // Grant allows one concurrent session; a second start is a capacity error
    let rejected = stack
        .orchestrator
        .start_impersonation(&admin, &request_for(second.id))
        .await;
    let err = rejected.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert!(err.message.contains("Concurrent session limit"));
    assert_eq!(stack.audit.get_active_sessions(Some(admin.id)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn end_reverts_state_and_counts_actions() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let target = common::seed_target(&stack.database, UserRole::Tenant).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let started = stack
        .orchestrator
        .start_impersonation(&admin, &request_for(target.id))
        .await?;

    for (action_type, description) in [
        (ActionType::DataView, "Viewed lease"),
        (ActionType::DataView, "Viewed payments"),
        (ActionType::DataModification, "Corrected address"),
    ] {
        stack
            .orchestrator
            .log_action(admin.id, action_type, description, None)
            .await;
    }

    let outcome = stack
        .orchestrator
        .end_impersonation(&started.session_id, EndReason::Manual, None)
        .await?;
    // The automatic session-start record is bookkeeping, not operator activity
    assert_eq!(outcome.actions_performed, 3);
    assert_eq!(outcome.status, SessionStatus::EndedManually);
    assert!(!stack.registry.is_impersonating(admin.id));

    // Second end reports failure, not a crash
    let again = stack
        .orchestrator
        .end_impersonation(&started.session_id, EndReason::Manual, None)
        .await;
    assert_eq!(again.unwrap_err().code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn log_action_outside_a_session_is_a_silent_no_op() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let before = stack.database.count_all_actions().await?;
    stack
        .orchestrator
        .log_action(admin.id, ActionType::DataView, "Viewed something", None)
        .await;
    assert_eq!(stack.database.count_all_actions().await?, before);
    Ok(())
}

#[tokio::test]
async fn malformed_target_identifiers_never_reach_the_store() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    for bad in ["not-a-uuid", "1 OR 1=1", ""] {
        let validation = stack
            .orchestrator
            .validate_request(admin.id, &request_for(bad))
            .await?;
        assert!(!validation.valid, "{bad:?} should be rejected");
    }
    Ok(())
}

#[tokio::test]
async fn validation_blocks_without_a_grant_and_on_suspended_targets() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let target = common::seed_target(&stack.database, UserRole::Leaseholder).await?;

    // No grant on file
    let validation = stack
        .orchestrator
        .validate_request(admin.id, &request_for(target.id))
        .await?;
    assert!(!validation.valid);
    assert!(validation.errors[0].contains("No impersonation grant"));

    // Inactive grant
    let mut grant = common::default_grant(admin.id);
    grant.is_active = false;
    common::seed_grant_with(&stack.database, &grant).await?;
    let validation = stack
        .orchestrator
        .validate_request(admin.id, &request_for(target.id))
        .await?;
    assert!(!validation.valid);
    assert!(validation.errors[0].contains("inactive or expired"));

    // Active grant, suspended target
    grant.is_active = true;
    common::seed_grant_with(&stack.database, &grant).await?;
    let mut banned = common::seed_target(&stack.database, UserRole::Tenant).await?;
    banned.is_banned = true;
    sqlx::query("UPDATE users SET is_banned = 1 WHERE id = ?")
        .bind(banned.id.to_string())
        .execute(stack.database.pool())
        .await?;
    let validation = stack
        .orchestrator
        .validate_request(admin.id, &request_for(banned.id))
        .await?;
    assert!(!validation.valid);
    assert!(validation.errors[0].contains("suspended"));
    Ok(())
}

#[tokio::test]
async fn validation_warns_when_approaching_limits() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let target = common::seed_target(&stack.database, UserRole::Leaseholder).await?;
    let mut grant = common::default_grant(admin.id);
    grant.max_concurrent_sessions = 2;
    grant.max_daily_sessions = 3;
    common::seed_grant_with(&stack.database, &grant).await?;

    // One active session of two allowed, two sessions today of three
    let first = common::seed_target(&stack.database, UserRole::Tenant).await?;
    let session = stack
        .audit
        .start_session(&admin, &first, ImpersonationReason::TechnicalIssue, None)
        .await?;
    stack
        .audit
        .end_session(&session.id, EndReason::Manual, None)
        .await?;
    stack
        .audit
        .start_session(&admin, &first, ImpersonationReason::TechnicalIssue, None)
        .await?;

    let validation = stack
        .orchestrator
        .validate_request(admin.id, &request_for(target.id))
        .await?;
    assert!(validation.valid);
    assert!(validation
        .warnings
        .iter()
        .any(|w| w.contains("concurrent slots")));
    assert!(validation
        .warnings
        .iter()
        .any(|w| w.contains("daily session limit")));
    Ok(())
}

#[tokio::test]
async fn search_fails_closed_without_a_grant() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    common::seed_target(&stack.database, UserRole::Leaseholder).await?;

    let result = stack
        .orchestrator
        .search_users(admin.id, &UserSearchFilters::default(), 1, 20)
        .await;
    assert_eq!(result.unwrap_err().code, ErrorCode::GrantInactive);
    Ok(())
}

#[tokio::test]
async fn search_scopes_to_the_grant_and_derives_flags() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let building = Uuid::new_v4();
    let in_scope =
        common::seed_target_in_building(&stack.database, UserRole::Leaseholder, building).await?;
    let out_of_building =
        common::seed_target_in_building(&stack.database, UserRole::Leaseholder, Uuid::new_v4())
            .await?;
    // Board members are outside the grant's allowed roles
    common::seed_target(&stack.database, UserRole::BoardMember).await?;

    let mut grant = common::default_grant(admin.id);
    grant.allowed_building_ids = Some(vec![building]);
    common::seed_grant_with(&stack.database, &grant).await?;

    let result = stack
        .orchestrator
        .search_users(admin.id, &UserSearchFilters::default(), 1, 20)
        .await?;
    assert_eq!(result.total, 1);
    assert_eq!(result.users[0].user.id, in_scope.id);
    assert!(result.users[0].can_impersonate);
    assert!(!result.has_more);
    assert_ne!(result.users[0].user.id, out_of_building.id);
    Ok(())
}

#[tokio::test]
async fn security_critical_actions_are_blocked_while_impersonating() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let admin = common::seed_admin(&stack.database).await?;
    let target = common::seed_target(&stack.database, UserRole::Tenant).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    // Not impersonating: everything is allowed
    assert!(
        stack
            .orchestrator
            .can_perform_action(admin.id, ActionType::PasswordReset)
            .await?
    );

    stack
        .orchestrator
        .start_impersonation(&admin, &request_for(target.id))
        .await?;

    assert!(
        stack
            .orchestrator
            .can_perform_action(admin.id, ActionType::DataView)
            .await?
    );
    // Policy violations, rejected outright
    for critical in [
        ActionType::PasswordReset,
        ActionType::EmailChange,
        ActionType::RoleChange,
    ] {
        assert!(!stack.orchestrator.can_perform_action(admin.id, critical).await?);
    }
    // Restricted by the grant
    assert!(
        !stack
            .orchestrator
            .can_perform_action(admin.id, ActionType::FinancialTransaction)
            .await?
    );
    Ok(())
}
