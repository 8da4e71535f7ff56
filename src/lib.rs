// ABOUTME: Main library entry point for the Propman impersonation service
// ABOUTME: Audited super admin impersonation for a multi-tenant property platform
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

#![deny(unsafe_code)]

//! # Propman Impersonation Server
//!
//! An administrative impersonation service for a multi-tenant property
//! management platform. Super admins can temporarily act as another user to
//! diagnose problems, with every session and action written to an append-only
//! audit trail and automatic safety termination on timeout or inactivity.
//!
//! ## Architecture
//!
//! - **Orchestrator**: validates start requests end to end and drives the
//!   session lifecycle
//! - **Audit service**: owns all reads and writes to the audit log and
//!   permission store
//! - **Safety monitor**: per-session warning, hard-timeout, and inactivity
//!   timers
//! - **Session state registry**: the in-memory real-actor/effective-actor
//!   overlay, rehydrated from the durable store after a restart
//! - **Security validator**: pre-flight gate re-checking roles, identifiers,
//!   and session limits immediately before a start

/// Audit service owning the impersonation audit trail
pub mod audit;
/// Bearer-token authentication for operators
pub mod auth;
/// Environment-based server configuration
pub mod config;
/// Real-actor/effective-actor request context
pub mod context;
/// Durable storage for users, grants, sessions, actions, and alerts
pub mod database;
/// Impersonation subsystem: orchestrator, validator, monitor, state holder
pub mod impersonation;
/// Structured logging setup
pub mod logging;
/// HTTP routes and the shared resource container
pub mod routes;
