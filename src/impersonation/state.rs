// ABOUTME: Session state registry - who is the real actor and who is the effective actor right now
// ABOUTME: Rehydrates from the durable store and runs the periodic expiry watchdog
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Session State Holder
//!
//! The in-memory record every other part of the application reads to know
//! "who am I acting as right now". One entry per operator; the entry is
//! created on a successful start, destroyed on any end, and rehydrated from
//! the durable session record after a restart while the session is still
//! inside its duration ceiling.

use crate::audit::{session_expired, AuditService};
use crate::impersonation::monitor::SafetyMonitor;
use chrono::Utc;
use dashmap::DashMap;
use propman_core::errors::{AppError, AppResult};
use propman_core::models::User;
use propman_core::permissions::{EndReason, ImpersonationSession, ImpersonationState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the watchdog re-checks elapsed time against the ceiling
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory impersonation state, one entry per operator
#[derive(Default)]
pub struct SessionStateRegistry {
    states: DashMap<Uuid, ImpersonationState>,
}

impl SessionStateRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the operator's effective actor to the impersonation target.
    ///
    /// `max_duration_minutes` is the grant's hard ceiling; the watchdog uses
    /// it independently of the safety monitor's timers.
    pub fn begin(
        &self,
        admin: User,
        target: User,
        session: &ImpersonationSession,
        max_duration_minutes: u32,
    ) {
        debug_assert!(!target.role.is_super_admin());
        let state = ImpersonationState {
            real_actor: admin,
            effective_actor: Some(target),
            session_id: Some(session.id.clone()),
            reason: Some(session.reason),
            started_at: Some(session.started_at),
            max_duration_minutes,
            warning_shown: false,
        };
        self.states.insert(state.real_actor.id, state);
    }

    /// Revert the operator to their real identity
    pub fn clear(&self, admin_id: Uuid) -> Option<ImpersonationState> {
        self.states.remove(&admin_id).map(|(_, state)| state)
    }

    /// Revert whichever operator holds the given session
    pub fn clear_session(&self, session_id: &str) -> Option<ImpersonationState> {
        self.clear(self.session_owner(session_id)?)
    }

    /// Snapshot of the operator's current state, if impersonating
    #[must_use]
    pub fn state(&self, admin_id: Uuid) -> Option<ImpersonationState> {
        self.states.get(&admin_id).map(|entry| entry.value().clone())
    }

    /// Whether the operator currently has an effective actor overlay
    #[must_use]
    pub fn is_impersonating(&self, admin_id: Uuid) -> bool {
        self.states
            .get(&admin_id)
            .is_some_and(|entry| entry.value().is_impersonating())
    }

    /// The identity the rest of the system must treat as "current user".
    ///
    /// Falls back to the real actor when no overlay is active.
    #[must_use]
    pub fn effective_actor(&self, admin: &User) -> User {
        self.states
            .get(&admin.id)
            .and_then(|entry| entry.value().effective_actor.clone())
            .unwrap_or_else(|| admin.clone())
    }

    /// Active session id for the operator, if any
    #[must_use]
    pub fn session_id(&self, admin_id: Uuid) -> Option<String> {
        self.states
            .get(&admin_id)
            .and_then(|entry| entry.value().session_id.clone())
    }

    /// Operator holding the given session, if any
    #[must_use]
    pub fn session_owner(&self, session_id: &str) -> Option<Uuid> {
        self.states.iter().find_map(|entry| {
            (entry.value().session_id.as_deref() == Some(session_id)).then(|| *entry.key())
        })
    }

    /// Record that the expiry warning was surfaced to the operator
    pub fn mark_warning_shown(&self, admin_id: Uuid) {
        if let Some(mut entry) = self.states.get_mut(&admin_id) {
            entry.value_mut().warning_shown = true;
        }
    }

    /// Iterate (admin id, session id, started at, ceiling) for the watchdog
    fn live_sessions(&self) -> Vec<(Uuid, String, chrono::DateTime<Utc>, u32)> {
        self.states
            .iter()
            .filter_map(|entry| {
                let state = entry.value();
                match (&state.session_id, state.started_at) {
                    (Some(session_id), Some(started_at)) => Some((
                        *entry.key(),
                        session_id.clone(),
                        started_at,
                        state.max_duration_minutes,
                    )),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Restore an operator's impersonation state from the durable store.
///
/// A recorded session older than its ceiling is never restored: it is
/// force-ended as a timeout and discarded.
pub async fn rehydrate(
    registry: &SessionStateRegistry,
    audit: &AuditService,
    monitor: &SafetyMonitor,
    admin: &User,
) -> AppResult<Option<ImpersonationState>> {
    let Some(session) = audit
        .get_active_sessions(Some(admin.id))
        .await?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };

    let ceiling = audit
        .get_user_permissions(admin.id)
        .await?
        .map_or(audit.default_limits().max_duration_minutes, |g| {
            g.max_session_duration_minutes
        });

    if session_expired(session.started_at, ceiling, Utc::now()) {
        info!(
            session_id = %session.id,
            admin_id = %admin.id,
            "Recorded session outlived its ceiling; discarding instead of restoring"
        );
        monitor
            .force_end_session(&session.id, EndReason::Timeout, "expired before rehydration")
            .await?;
        return Ok(None);
    }

    let target = lookup_target(audit, &session).await?;
    registry.begin(admin.clone(), target, &session, ceiling);
    info!(
        session_id = %session.id,
        admin_id = %admin.id,
        "Restored impersonation state from durable session record"
    );
    Ok(registry.state(admin.id))
}

async fn lookup_target(
    audit: &AuditService,
    session: &ImpersonationSession,
) -> AppResult<User> {
    audit
        .lookup_user(session.target_user_id)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!(
                "Target user {} of session {} no longer exists",
                session.target_user_id, session.id
            ))
        })
}

/// Background expiry check, independent of the safety monitor's own timers.
///
/// Both paths converge on the monitor's idempotent force-end routine, so a
/// missed or cleared timer cannot leave a session running past its ceiling
/// and a double detection cannot double-log.
pub fn spawn_watchdog(
    registry: Arc<SessionStateRegistry>,
    monitor: Arc<SafetyMonitor>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = Utc::now();
            for (admin_id, session_id, started_at, ceiling) in registry.live_sessions() {
                if session_expired(started_at, ceiling, now) {
                    debug!(
                        session_id = %session_id,
                        admin_id = %admin_id,
                        "Watchdog detected expired session"
                    );
                    if let Err(e) = monitor
                        .force_end_session(&session_id, EndReason::Timeout, "duration ceiling reached (watchdog)")
                        .await
                    {
                        warn!(session_id = %session_id, "Watchdog failed to end session: {e}");
                    }
                }
            }
        }
    })
}
