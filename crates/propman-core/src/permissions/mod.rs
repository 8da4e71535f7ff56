// ABOUTME: Permission system for administrative impersonation
// ABOUTME: Grants bound what an operator may do; audit types record what they did
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Role-based permission and audit types for the impersonation subsystem.

/// Impersonation grants, sessions, and in-memory session state
pub mod impersonation;

/// Audited actions, risk classification, and security alerts
pub mod audit;

pub use audit::{
    ActionType, AlertSeverity, AlertType, AuditedAction, RiskLevel, SecurityAlert,
};
pub use impersonation::{
    EndReason, ImpersonationGrant, ImpersonationReason, ImpersonationSession, ImpersonationState,
    SessionLimits, SessionStatus,
};
