// ABOUTME: Safety monitor arming warning, hard-timeout, and inactivity timers per session
// ABOUTME: Every termination path converges on one idempotent force-end routine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Safety Monitor
//!
//! Arms three independent deadlines per active session: an expiry warning, a
//! hard duration timeout, and an inactivity timeout. Observed operator input
//! resets the inactivity window; a hidden page clamps it to a fixed stricter
//! value since activity cannot be observed while hidden. Timer teardown
//! happens exactly once on any termination path.

use crate::audit::{AuditService, SessionEndOutcome};
use crate::impersonation::state::SessionStateRegistry;
use chrono::Utc;
use dashmap::DashMap;
use propman_core::errors::{AppError, AppResult, ErrorCode};
use propman_core::permissions::{
    ActionType, AuditedAction, EndReason, ImpersonationSession, RiskLevel, SessionLimits,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

/// Inactivity window applied while the page is hidden, regardless of the
/// configured timeout
const HIDDEN_INACTIVITY_MINUTES: u64 = 5;

/// Events surfaced to the facade/UI layer
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The session is approaching its ceiling; offer extend-or-continue
    ExpiryWarning {
        /// Session concerned
        session_id: String,
        /// Minutes left before forced termination
        remaining_minutes: u64,
    },
    /// The session was force-ended; the UI must leave the impersonated context
    ForcedEnd {
        /// Session concerned
        session_id: String,
        /// Why the session was ended
        reason: EndReason,
    },
}

#[derive(Debug)]
struct TimerState {
    /// Current effective ceiling in minutes; extensions raise it
    max_minutes: u64,
    /// Grant ceiling extensions may never exceed
    hard_ceiling_minutes: u64,
    /// Minutes before the ceiling the warning fires
    warning_at_minutes: u64,
    /// Configured inactivity window
    inactivity_minutes: u64,
    /// Last observed operator input
    last_activity: Instant,
    /// Whether the page is currently hidden
    hidden: bool,
    /// Whether the warning already fired
    warning_sent: bool,
}

struct TimerShared {
    started: Instant,
    state: Mutex<TimerState>,
    nudge: Notify,
}

struct MonitorHandle {
    shared: Arc<TimerShared>,
    task: tokio::task::JoinHandle<()>,
}

enum Deadline {
    Warning,
    Hard,
    Inactivity,
}

struct MonitorInner {
    audit: Arc<AuditService>,
    registry: Arc<SessionStateRegistry>,
    sessions: DashMap<String, MonitorHandle>,
    events: mpsc::Sender<MonitorEvent>,
}

/// Client-safety timers enforcing max duration, inactivity, and warnings
#[derive(Clone)]
pub struct SafetyMonitor {
    inner: Arc<MonitorInner>,
}

impl SafetyMonitor {
    /// Create a monitor and the event stream its warnings and forced ends
    /// are delivered on
    #[must_use]
    pub fn new(
        audit: Arc<AuditService>,
        registry: Arc<SessionStateRegistry>,
    ) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (events, receiver) = mpsc::channel(64);
        (
            Self {
                inner: Arc::new(MonitorInner {
                    audit,
                    registry,
                    sessions: DashMap::new(),
                    events,
                }),
            },
            receiver,
        )
    }

    /// Arm all three timers for a session.
    ///
    /// `limits.max_duration_minutes` is the planned session length;
    /// `hard_ceiling_minutes` is the grant ceiling extensions may reach.
    /// Sessions restored after a restart are credited with their wall-clock
    /// elapsed time.
    pub fn start_monitoring(
        &self,
        session: &ImpersonationSession,
        limits: SessionLimits,
        hard_ceiling_minutes: u32,
    ) {
        let elapsed = (Utc::now() - session.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let now = Instant::now();
        let started = now.checked_sub(elapsed).unwrap_or(now);

        let max_minutes =
            u64::from(limits.max_duration_minutes.min(hard_ceiling_minutes));
        let shared = Arc::new(TimerShared {
            started,
            state: Mutex::new(TimerState {
                max_minutes,
                hard_ceiling_minutes: u64::from(hard_ceiling_minutes),
                warning_at_minutes: u64::from(limits.warning_at_minutes),
                inactivity_minutes: u64::from(limits.inactivity_timeout_minutes),
                last_activity: now,
                hidden: false,
                warning_sent: false,
            }),
            nudge: Notify::new(),
        });

        let task = tokio::spawn(Self::run_timers(
            Arc::clone(&self.inner),
            session.id.clone(),
            Arc::clone(&shared),
        ));

        // Re-arming an already-monitored session replaces its timers
        if let Some(previous) = self
            .inner
            .sessions
            .insert(session.id.clone(), MonitorHandle { shared, task })
        {
            previous.task.abort();
        }
    }

    /// Observed operator input; resets the inactivity window
    pub fn record_activity(&self, session_id: &str) {
        if let Some(handle) = self.inner.sessions.get(session_id) {
            if let Ok(mut state) = handle.shared.state.lock() {
                state.last_activity = Instant::now();
            }
            handle.shared.nudge.notify_one();
        }
    }

    /// Page visibility change; a hidden page gets the stricter fixed window
    pub fn set_visibility(&self, session_id: &str, hidden: bool) {
        if let Some(handle) = self.inner.sessions.get(session_id) {
            if let Ok(mut state) = handle.shared.state.lock() {
                state.hidden = hidden;
                if !hidden {
                    // Coming back to the foreground counts as activity
                    state.last_activity = Instant::now();
                }
            }
            handle.shared.nudge.notify_one();
        }
    }

    /// Request more time before the hard timeout.
    ///
    /// The extension is capped so total duration never exceeds the grant's
    /// hard ceiling; with no headroom left the request is refused.
    pub fn request_extension(&self, session_id: &str, minutes: u32) -> AppResult<u32> {
        let handle = self
            .inner
            .sessions
            .get(session_id)
            .ok_or_else(|| AppError::not_found(format!("Session {session_id} is not monitored")))?;

        let mut state = handle
            .shared
            .state
            .lock()
            .map_err(|_| AppError::internal("Timer state poisoned"))?;

        let headroom = state.hard_ceiling_minutes.saturating_sub(state.max_minutes);
        if headroom == 0 {
            return Err(AppError::limit_exceeded(format!(
                "Session already at its {} minute ceiling; extension refused",
                state.hard_ceiling_minutes
            )));
        }

        let granted = u64::from(minutes).min(headroom);
        state.max_minutes += granted;
        state.warning_sent = false;
        drop(state);
        handle.shared.nudge.notify_one();

        info!(session_id = %session_id, granted_minutes = granted, "Session extension granted");
        Ok(granted as u32)
    }

    /// Tear down timers without touching the session record.
    ///
    /// Used by the manual end path after the session is already closed;
    /// idempotent, so a second stop is a no-op.
    pub fn stop_monitoring(&self, session_id: &str) {
        if let Some((_, handle)) = self.inner.sessions.remove(session_id) {
            handle.task.abort();
        }
    }

    /// Force-end a session: log a high-risk action describing the cause,
    /// close the session record, revert the state holder, and signal the UI.
    ///
    /// Safe to call from any termination path; the conditional close in the
    /// store guarantees the side effects happen exactly once. Returns `None`
    /// if the session had already ended.
    pub async fn force_end_session(
        &self,
        session_id: &str,
        reason: EndReason,
        cause: &str,
    ) -> AppResult<Option<SessionEndOutcome>> {
        self.stop_monitoring(session_id);
        self.inner.finalize(session_id, reason, cause).await
    }

    async fn run_timers(inner: Arc<MonitorInner>, session_id: String, shared: Arc<TimerShared>) {
        loop {
            let Some((deadline, kind)) = next_deadline(&shared) else {
                return;
            };

            tokio::select! {
                () = sleep_until(deadline) => match kind {
                    Deadline::Warning => {
                        let remaining = remaining_minutes(&shared);
                        if let Ok(mut state) = shared.state.lock() {
                            state.warning_sent = true;
                        }
                        if let Some(admin_id) = inner.registry.session_owner(&session_id) {
                            inner.registry.mark_warning_shown(admin_id);
                        }
                        let _ = inner
                            .events
                            .send(MonitorEvent::ExpiryWarning {
                                session_id: session_id.clone(),
                                remaining_minutes: remaining,
                            })
                            .await;
                    }
                    Deadline::Hard => {
                        // Detach without abort: this task ends itself after firing
                        inner.sessions.remove(&session_id);
                        if let Err(e) = inner
                            .finalize(&session_id, EndReason::Timeout, "maximum session duration reached")
                            .await
                        {
                            warn!(session_id = %session_id, "Failed to finalize timed-out session: {e}");
                        }
                        return;
                    }
                    Deadline::Inactivity => {
                        inner.sessions.remove(&session_id);
                        if let Err(e) = inner
                            .finalize(&session_id, EndReason::Inactivity, "no operator activity observed")
                            .await
                        {
                            warn!(session_id = %session_id, "Failed to finalize inactive session: {e}");
                        }
                        return;
                    }
                },
                () = shared.nudge.notified() => {}
            }
        }
    }
}

impl MonitorInner {
    /// The single forced-end routine all termination paths converge on
    async fn finalize(
        &self,
        session_id: &str,
        reason: EndReason,
        cause: &str,
    ) -> AppResult<Option<SessionEndOutcome>> {
        let Some(session) = self.audit.get_session(session_id).await? else {
            return Ok(None);
        };

        let outcome = match self.audit.end_session(session_id, reason, Some(cause)).await {
            Ok(outcome) => outcome,
            // Lost the race against another termination path; nothing to do
            Err(e) if e.code == ErrorCode::ResourceNotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let action = AuditedAction::new(
            session_id,
            session.admin_id,
            session.target_user_id,
            ActionType::SessionEnd,
            format!("Session force-ended ({reason:?}): {cause}"),
        )
        .with_risk_level(RiskLevel::High);
        self.audit.log_action(action, None).await;

        self.registry.clear(session.admin_id);

        let _ = self
            .events
            .send(MonitorEvent::ForcedEnd {
                session_id: session_id.to_owned(),
                reason,
            })
            .await;

        info!(
            session_id = %session_id,
            reason = ?reason,
            cause,
            "Session force-ended"
        );

        Ok(Some(outcome))
    }
}

fn next_deadline(shared: &TimerShared) -> Option<(Instant, Deadline)> {
    let state = shared.state.lock().ok()?;

    let hard = shared.started + Duration::from_secs(state.max_minutes * 60);
    let inactivity_window = if state.hidden {
        HIDDEN_INACTIVITY_MINUTES.min(state.inactivity_minutes)
    } else {
        state.inactivity_minutes
    };
    let inactivity = state.last_activity + Duration::from_secs(inactivity_window * 60);

    let mut next = (hard, Deadline::Hard);
    if inactivity < next.0 {
        next = (inactivity, Deadline::Inactivity);
    }
    if !state.warning_sent && state.warning_at_minutes < state.max_minutes {
        let warning = shared.started
            + Duration::from_secs((state.max_minutes - state.warning_at_minutes) * 60);
        if warning < next.0 {
            next = (warning, Deadline::Warning);
        }
    }
    Some(next)
}

fn remaining_minutes(shared: &TimerShared) -> u64 {
    shared.state.lock().map_or(0, |state| {
        let elapsed = shared.started.elapsed().as_secs() / 60;
        state.max_minutes.saturating_sub(elapsed)
    })
}
