// ABOUTME: Helper modules shared by HTTP integration tests
// ABOUTME: Request/response utilities for exercising Axum routers in-process
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod axum_test;
