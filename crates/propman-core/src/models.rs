// ABOUTME: Core user and building models for the multi-tenant property platform
// ABOUTME: Roles and derived account status drive impersonation eligibility
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

//! Core data models shared across the platform.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days without a login before an account is considered inactive
pub const INACTIVE_AFTER_DAYS: i64 = 30;

/// User role within the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Platform operator with full administrative access
    SuperAdmin,
    /// Manages one or more buildings on behalf of owners
    PropertyManager,
    /// Member of a building's board
    BoardMember,
    /// Holds a lease on a unit
    Leaseholder,
    /// Occupies a unit without holding the lease
    Tenant,
}

impl UserRole {
    /// String form stored in the database and wire formats
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::PropertyManager => "property_manager",
            Self::BoardMember => "board_member",
            Self::Leaseholder => "leaseholder",
            Self::Tenant => "tenant",
        }
    }

    /// Parse from the stored string form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "property_manager" => Some(Self::PropertyManager),
            "board_member" => Some(Self::BoardMember),
            "leaseholder" => Some(Self::Leaseholder),
            "tenant" => Some(Self::Tenant),
            _ => None,
        }
    }

    /// Whether this is the privileged operator role
    #[must_use]
    pub const fn is_super_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived account status for user listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Account is in normal use
    Active,
    /// No login within [`INACTIVE_AFTER_DAYS`]
    Inactive,
    /// Account is banned
    Suspended,
}

/// A user of the property-management platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,
    /// User email address (used for identification)
    pub email: String,
    /// Display name
    pub display_name: Option<String>,
    /// Role for the permission system
    pub role: UserRole,
    /// Building this user belongs to, if any
    pub building_id: Option<Uuid>,
    /// Denormalized building name for listings
    pub building_name: Option<String>,
    /// When the user account was created
    pub created_at: DateTime<Utc>,
    /// Last successful login, if any
    pub last_login_at: Option<DateTime<Utc>>,
    /// Whether the account is banned
    pub is_banned: bool,
}

impl User {
    /// Create a new user with the given role
    #[must_use]
    pub fn new(email: impl Into<String>, display_name: Option<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            display_name,
            role,
            building_id: None,
            building_name: None,
            created_at: Utc::now(),
            last_login_at: None,
            is_banned: false,
        }
    }

    /// Assign the user to a building
    #[must_use]
    pub fn with_building(mut self, building_id: Uuid, building_name: impl Into<String>) -> Self {
        self.building_id = Some(building_id);
        self.building_name = Some(building_name.into());
        self
    }

    /// Derived account status: suspended if banned, inactive after 30 days
    /// without a login, otherwise active
    #[must_use]
    pub fn account_status(&self, now: DateTime<Utc>) -> AccountStatus {
        if self.is_banned {
            return AccountStatus::Suspended;
        }
        match self.last_login_at {
            Some(last) if now - last < Duration::days(INACTIVE_AFTER_DAYS) => {
                AccountStatus::Active
            }
            _ => AccountStatus::Inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_string_form() {
        for role in [
            UserRole::SuperAdmin,
            UserRole::PropertyManager,
            UserRole::BoardMember,
            UserRole::Leaseholder,
            UserRole::Tenant,
        ] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("janitor"), None);
    }

    #[test]
    fn account_status_derivation() {
        let now = Utc::now();
        let mut user = User::new("lease@example.com", None, UserRole::Leaseholder);

        user.last_login_at = Some(now - Duration::days(2));
        assert_eq!(user.account_status(now), AccountStatus::Active);

        user.last_login_at = Some(now - Duration::days(45));
        assert_eq!(user.account_status(now), AccountStatus::Inactive);

        user.last_login_at = None;
        assert_eq!(user.account_status(now), AccountStatus::Inactive);

        user.is_banned = true;
        assert_eq!(user.account_status(now), AccountStatus::Suspended);
    }
}
