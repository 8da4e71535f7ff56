// ABOUTME: Integration tests for the safety monitor timers under a paused clock
// ABOUTME: Hard timeout, inactivity, hidden-page clamp, warnings, and extension caps
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
    EndReason, ImpersonationReason, ImpersonationSession, SessionLimits, SessionStatus,
};
use propman_server::impersonation::MonitorEvent;
use std::time::Duration;

async fn start_monitored_session(
    stack: &common::TestStack,
    limits: SessionLimits,
    hard_ceiling: u32,
) -> Result<ImpersonationSession> {
    let admin = common::seed_admin(&stack.database).await?;
    let target = common::seed_target(&stack.database, UserRole::Tenant).await?;
    common::seed_grant(&stack.database, admin.id).await?;

    let session = stack
        .audit
        .start_session(&admin, &target, ImpersonationReason::TechnicalIssue, None)
        .await?;
    stack
        .registry
        .begin(admin, target, &session, hard_ceiling);
    stack.monitor.start_monitoring(&session, limits, hard_ceiling);
    Ok(session)
}

#[tokio::test]
async fn hard_timeout_force_ends_with_timeout_status() -> Result<()> {
    let mut stack = common::create_test_stack().await?;
    let limits = SessionLimits {
        max_duration_minutes: 30,
        warning_at_minutes: 5,
        inactivity_timeout_minutes: 120,
    };
    let session = start_monitored_session(&stack, limits, 30).await?;

    // Pause only once the pool is warm; sqlx crosses the blocking pool, and a
    // paused clock during setup auto-advances past the acquire timeout.
    // Resume before awaiting the event: the fired timer's finalize path does
    // sqlx work too and must run on the real clock
    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    tokio::time::resume();

    // Warning fires on the way to the hard timeout
    let warning = stack.events.recv().await.unwrap();
    assert!(matches!(warning, MonitorEvent::ExpiryWarning { .. }));
    let forced = stack.events.recv().await.unwrap();
    assert!(matches!(
        forced,
        MonitorEvent::ForcedEnd {
            reason: EndReason::Timeout,
            ..
        }
    ));

    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::EndedTimeout);
    assert!(!stack.registry.is_impersonating(stored.admin_id));
    Ok(())
}

#[tokio::test]
async fn silence_force_ends_with_inactivity_status() -> Result<()> {
    let mut stack = common::create_test_stack().await?;
    let session = start_monitored_session(&stack, common::test_limits(), 60).await?;

    // 15 minute inactivity window, no input at all; resume before awaiting so
    // the finalize path's sqlx work runs on the real clock
    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(16 * 60)).await;
    tokio::time::resume();

    let forced = stack.events.recv().await.unwrap();
    assert!(matches!(
        forced,
        MonitorEvent::ForcedEnd {
            reason: EndReason::Inactivity,
            ..
        }
    ));
    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::EndedInactivity);
    Ok(())
}

#[tokio::test]
async fn activity_resets_the_inactivity_window() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let session = start_monitored_session(&stack, common::test_limits(), 60).await?;

    // Keep poking inside the 15 minute window; the session must survive
    tokio::time::pause();
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        stack.monitor.record_activity(&session.id);
    }
    // Resume before touching the database: the armed timers must not be
    // auto-advanced into while sqlx waits on its blocking thread
    tokio::time::resume();

    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    Ok(())
}

#[tokio::test]
async fn hidden_page_clamps_the_inactivity_window() -> Result<()> {
    let mut stack = common::create_test_stack().await?;
    let session = start_monitored_session(&stack, common::test_limits(), 60).await?;

    stack.monitor.set_visibility(&session.id, true);
    // Six minutes hidden exceeds the five-minute clamp, well under the
    // configured fifteen; resume before awaiting so the finalize path's sqlx
    // work runs on the real clock
    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    tokio::time::resume();

    let forced = stack.events.recv().await.unwrap();
    assert!(matches!(
        forced,
        MonitorEvent::ForcedEnd {
            reason: EndReason::Inactivity,
            ..
        }
    ));
    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::EndedInactivity);
    Ok(())
}

#[tokio::test]
async fn extension_is_capped_at_the_grant_ceiling() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let limits = SessionLimits {
        max_duration_minutes: 30,
        warning_at_minutes: 5,
        inactivity_timeout_minutes: 120,
    };
    // 30 planned minutes against a 60 minute grant ceiling
    let session = start_monitored_session(&stack, limits, 60).await?;

    // Asking for 100 minutes grants only the 30 of headroom
    let granted = stack.monitor.request_extension(&session.id, 100)?;
    assert_eq!(granted, 30);

    // No headroom left: refused with the ceiling echoed back
    let refused = stack.monitor.request_extension(&session.id, 10);
    let err = refused.unwrap_err();
    assert_eq!(err.code, ErrorCode::LimitExceeded);
    assert!(err.message.contains("60"));
    Ok(())
}

#[tokio::test]
async fn force_end_is_idempotent_across_paths() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let session = start_monitored_session(&stack, common::test_limits(), 60).await?;
    let actions_after_start = stack.database.count_all_actions().await?;

    let first = stack
        .monitor
        .force_end_session(&session.id, EndReason::Security, "forced by test")
        .await?;
    assert!(first.is_some());

    // A second force-end from any other path finds nothing to do
    let second = stack
        .monitor
        .force_end_session(&session.id, EndReason::Timeout, "watchdog sweep")
        .await?;
    assert!(second.is_none());

    // Exactly one forced-end action was logged
    assert_eq!(
        stack.database.count_all_actions().await?,
        actions_after_start + 1
    );
    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::EndedSecurity);
    Ok(())
}

#[tokio::test]
async fn stopping_monitoring_leaves_the_session_untouched() -> Result<()> {
    let stack = common::create_test_stack().await?;
    let session = start_monitored_session(&stack, common::test_limits(), 60).await?;

    stack.monitor.stop_monitoring(&session.id);
    stack.monitor.stop_monitoring(&session.id);

    // With the timers gone, nothing fires even past every deadline
    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
    tokio::time::resume();
    let stored = stack.audit.get_session(&session.id).await?.unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    Ok(())
}
