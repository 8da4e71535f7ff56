// ABOUTME: Bearer-token authentication resolving opaque operator tokens to users
// ABOUTME: The identity layer impersonation overlays on top of - it never re-authenticates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Authentication
//!
//! Operators authenticate with an opaque bearer token issued out of band and
//! stored alongside the user record. Impersonation never re-authenticates as
//! the target: the authenticated session stays the operator's, and the
//! effective actor is an overlay consulted by business logic.

use crate::database::Database;
use propman_core::errors::{AppError, AppResult};
use propman_core::models::User;
use rand::RngCore;
use std::sync::Arc;
use tracing::warn;

/// Length in bytes of a freshly issued token, before hex encoding
const TOKEN_BYTES: usize = 32;

/// Resolves bearer tokens to operator identities
pub struct AuthManager {
    database: Arc<Database>,
}

impl AuthManager {
    /// Create an auth manager over the user store
    #[must_use]
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Issue a fresh opaque token for a user and persist it
    pub async fn issue_token(&self, user: &User) -> AppResult<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.database.create_operator_token(&token, user.id).await?;
        Ok(token)
    }

    /// Resolve an `Authorization` header value to the authenticated user
    pub async fn authenticate(&self, authorization: Option<&str>) -> AppResult<User> {
        let header = authorization.ok_or_else(AppError::auth_required)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth_invalid("Authorization header must be a bearer token"))?;

        self.database
            .get_user_by_token(token)
            .await?
            .ok_or_else(|| {
                warn!("Rejected unknown bearer token");
                AppError::auth_invalid("Unknown or revoked token")
            })
    }

    /// Resolve the header and additionally require the super admin role
    pub async fn authenticate_super_admin(&self, authorization: Option<&str>) -> AppResult<User> {
        let user = self.authenticate(authorization).await?;
        if !user.role.is_super_admin() {
            return Err(AppError::permission_denied(
                "This endpoint requires the super admin role",
            )
            .with_user_id(user.id));
        }
        Ok(user)
    }
}
