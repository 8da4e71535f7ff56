// ABOUTME: Core types for the Propman property-management platform
// ABOUTME: Foundation crate with error handling, user models, and impersonation/audit types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

#![deny(unsafe_code)]

//! # Propman Core
//!
//! Foundation crate providing shared types for the Propman property-management
//! platform. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and HTTP responses
//! - **models**: Core data models (`User`, `UserRole`, derived account status)
//! - **permissions**: Impersonation grants, sessions, audited actions, and alerts

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Core data models (`User`, `UserRole`, account status)
pub mod models;

/// Impersonation permission and audit types
pub mod permissions;
