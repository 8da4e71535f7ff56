// ABOUTME: Impersonation subsystem - orchestrator, pre-flight gate, safety timers, state holder
// ABOUTME: The audit service underneath owns all durable reads and writes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Impersonation Subsystem
//!
//! Lets a super admin temporarily act as another user under a bounding grant,
//! with a full audit trail and automatic safety termination.

pub mod monitor;
pub mod orchestrator;
pub mod state;
pub mod validator;

pub use monitor::{MonitorEvent, SafetyMonitor};
pub use orchestrator::{
    ImpersonationOrchestrator, ImpersonationRequest, RequestValidation, SearchedUser,
    StartOutcome, UserSearchResult,
};
pub use state::{rehydrate, spawn_watchdog, SessionStateRegistry};
pub use validator::{SecurityCheck, SecurityValidator};
