// ABOUTME: Actor context - the two-layer identity every request handler works with
// ABOUTME: Real actor comes from authentication; effective actor from the impersonation overlay
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! # Actor Context
//!
//! Identity is two explicit layers: the authenticated operator (real actor)
//! and the impersonation overlay (effective actor). Business logic consults
//! the effective actor; impersonation-aware surfaces (exit banner, audit)
//! consult the real one. The two are passed together rather than through
//! any ambient global.

use crate::impersonation::SessionStateRegistry;
use propman_core::models::User;
use serde::Serialize;

/// The pair of identities a request executes under
#[derive(Debug, Clone, Serialize)]
pub struct ActorContext {
    /// The actually-authenticated operator
    pub real_actor: User,
    /// The identity business logic must treat as "current user"
    pub effective_actor: User,
    /// Active impersonation session, if the two actors differ
    pub session_id: Option<String>,
}

impl ActorContext {
    /// Resolve the context for an authenticated operator against the
    /// current impersonation overlay
    #[must_use]
    pub fn resolve(registry: &SessionStateRegistry, real_actor: User) -> Self {
        let effective_actor = registry.effective_actor(&real_actor);
        let session_id = registry.session_id(real_actor.id);
        Self {
            real_actor,
            effective_actor,
            session_id,
        }
    }

    /// Whether an impersonation overlay is active for this request
    #[must_use]
    pub fn is_impersonating(&self) -> bool {
        self.session_id.is_some() && self.real_actor.id != self.effective_actor.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propman_core::models::UserRole;
    use propman_core::permissions::{ImpersonationReason, ImpersonationSession};

    #[test]
    fn context_follows_the_overlay() {
        let registry = SessionStateRegistry::new();
        let admin = User::new("admin@example.com", None, UserRole::SuperAdmin);
        let target = User::new("tenant@example.com", None, UserRole::Tenant);

        let idle = ActorContext::resolve(&registry, admin.clone());
        assert!(!idle.is_impersonating());
        assert_eq!(idle.effective_actor.id, admin.id);

        let session = ImpersonationSession::new(
            &admin,
            &target,
            ImpersonationReason::TechnicalIssue,
            None,
        );
        registry.begin(admin.clone(), target.clone(), &session, 60);

        let overlaid = ActorContext::resolve(&registry, admin.clone());
        assert!(overlaid.is_impersonating());
        assert_eq!(overlaid.effective_actor.id, target.id);
        assert_eq!(overlaid.real_actor.id, admin.id);
    }
}
