// ABOUTME: User storage and grant-scoped user search for the impersonation picker
// ABOUTME: Search constraints are conjunctive and pagination is offset-based
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Propman

use super::Database;
use chrono::{DateTime, Utc};
use propman_core::errors::{AppError, AppResult};
use propman_core::models::{User, UserRole};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Conjunctive filters applied to a user search
#[derive(Debug, Clone, Default)]
pub struct UserSearchFilters {
    /// Restrict to these roles (already intersected with the grant)
    pub roles: Vec<UserRole>,
    /// Restrict to these buildings; `None` means unrestricted
    pub building_ids: Option<Vec<Uuid>>,
    /// Email substring match
    pub email_contains: Option<String>,
    /// Building-name substring match
    pub building_name_contains: Option<String>,
    /// Registered on or after
    pub registered_after: Option<DateTime<Utc>>,
    /// Registered on or before
    pub registered_before: Option<DateTime<Utc>>,
    /// Last login on or after
    pub last_login_after: Option<DateTime<Utc>>,
    /// Last login on or before
    pub last_login_before: Option<DateTime<Utc>>,
}

/// One page of user search results
#[derive(Debug, Clone)]
pub struct UserSearchPage {
    /// Users on this page
    pub users: Vec<User>,
    /// Total matches across all pages
    pub total: u64,
}

impl Database {
    pub(crate) async fn migrate_users(&self) -> AppResult<()> {
        self.execute_schema(&[
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                role TEXT NOT NULL,
                building_id TEXT,
                building_name TEXT,
                created_at TEXT NOT NULL,
                last_login_at TEXT,
                is_banned INTEGER NOT NULL DEFAULT 0
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS operator_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
            "CREATE INDEX IF NOT EXISTS idx_users_building ON users(building_id)",
        ])
        .await
    }

    /// Insert a user record
    pub async fn create_user(&self, user: &User) -> AppResult<()> {
        let query = r"
            INSERT INTO users (
                id, email, display_name, role, building_id, building_name,
                created_at, last_login_at, is_banned
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(user.role.as_str())
            .bind(user.building_id.map(|id| id.to_string()))
            .bind(&user.building_name)
            .bind(user.created_at.to_rfc3339())
            .bind(user.last_login_at.map(|dt| dt.to_rfc3339()))
            .bind(user.is_banned)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to create user: {e}")))?;

        Ok(())
    }

    /// Get a user by ID
    pub async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let query = r"
            SELECT id, email, display_name, role, building_id, building_name,
                   created_at, last_login_at, is_banned
            FROM users WHERE id = ?
        ";

        let row = sqlx::query(query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?;

        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    /// Store an opaque operator bearer token
    pub async fn create_operator_token(&self, token: &str, user_id: Uuid) -> AppResult<()> {
        sqlx::query("INSERT INTO operator_tokens (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to store operator token: {e}")))?;
        Ok(())
    }

    /// Resolve a bearer token to its user, if the token exists
    pub async fn get_user_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let query = r"
            SELECT u.id, u.email, u.display_name, u.role, u.building_id, u.building_name,
                   u.created_at, u.last_login_at, u.is_banned
            FROM operator_tokens t JOIN users u ON u.id = t.user_id
            WHERE t.token = ?
        ";

        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to resolve token: {e}")))?;

        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    /// Search users with conjunctive filters and offset pagination
    pub async fn search_users(
        &self,
        filters: &UserSearchFilters,
        page: u32,
        page_size: u32,
    ) -> AppResult<UserSearchPage> {
        let (where_clause, binds) = Self::user_search_where(filters);

        let count_sql = format!("SELECT COUNT(*) AS total FROM users WHERE {where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind.clone());
        }
        let total: i64 = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count users: {e}")))?
            .get("total");

        let select_sql = format!(
            r"
            SELECT id, email, display_name, role, building_id, building_name,
                   created_at, last_login_at, is_banned
            FROM users WHERE {where_clause}
            ORDER BY email ASC LIMIT ? OFFSET ?
            "
        );
        let mut select_query = sqlx::query(&select_sql);
        for bind in &binds {
            select_query = select_query.bind(bind.clone());
        }
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        select_query = select_query.bind(i64::from(page_size)).bind(offset);

        let rows = select_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to search users: {e}")))?;

        let users = rows
            .iter()
            .map(Self::row_to_user)
            .collect::<AppResult<Vec<User>>>()?;

        Ok(UserSearchPage {
            users,
            total: total.max(0) as u64,
        })
    }

    fn user_search_where(filters: &UserSearchFilters) -> (String, Vec<String>) {
        let mut clauses = vec!["role != 'super_admin'".to_string()];
        let mut binds: Vec<String> = Vec::new();

        if !filters.roles.is_empty() {
            let placeholders = vec!["?"; filters.roles.len()].join(", ");
            clauses.push(format!("role IN ({placeholders})"));
            binds.extend(filters.roles.iter().map(|r| r.as_str().to_owned()));
        }
        if let Some(building_ids) = &filters.building_ids {
            if building_ids.is_empty() {
                // Restricted grant with no buildings matches nothing
                clauses.push("1 = 0".to_string());
            } else {
                let placeholders = vec!["?"; building_ids.len()].join(", ");
                clauses.push(format!("building_id IN ({placeholders})"));
                binds.extend(building_ids.iter().map(ToString::to_string));
            }
        }
        if let Some(fragment) = &filters.email_contains {
            clauses.push("email LIKE ?".to_string());
            binds.push(format!("%{fragment}%"));
        }
        if let Some(fragment) = &filters.building_name_contains {
            clauses.push("building_name LIKE ?".to_string());
            binds.push(format!("%{fragment}%"));
        }
        if let Some(after) = filters.registered_after {
            clauses.push("created_at >= ?".to_string());
            binds.push(after.to_rfc3339());
        }
        if let Some(before) = filters.registered_before {
            clauses.push("created_at <= ?".to_string());
            binds.push(before.to_rfc3339());
        }
        if let Some(after) = filters.last_login_after {
            clauses.push("last_login_at >= ?".to_string());
            binds.push(after.to_rfc3339());
        }
        if let Some(before) = filters.last_login_before {
            clauses.push("last_login_at <= ?".to_string());
            binds.push(before.to_rfc3339());
        }

        (clauses.join(" AND "), binds)
    }

    /// Convert database row to `User`
    pub(crate) fn row_to_user(row: &SqliteRow) -> AppResult<User> {
        let id: String = row.get("id");
        let email: String = row.get("email");
        let display_name: Option<String> = row.get("display_name");
        let role: String = row.get("role");
        let building_id: Option<String> = row.get("building_id");
        let building_name: Option<String> = row.get("building_name");
        let created_at: String = row.get("created_at");
        let last_login_at: Option<String> = row.get("last_login_at");
        let is_banned: bool = row.get("is_banned");

        Ok(User {
            id: Uuid::parse_str(&id)
                .map_err(|e| AppError::database(format!("Invalid user id UUID: {e}")))?,
            email,
            display_name,
            role: UserRole::parse(&role)
                .ok_or_else(|| AppError::database(format!("Unknown role: {role}")))?,
            building_id: building_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| AppError::database(format!("Invalid building_id UUID: {e}")))?,
            building_name,
            created_at: parse_timestamp(&created_at, "created_at")?,
            last_login_at: last_login_at
                .map(|s| parse_timestamp(&s, "last_login_at"))
                .transpose()?,
            is_banned,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|e| AppError::database(format!("Invalid {column} timestamp: {e}")))
        .map(|dt| dt.with_timezone(&Utc))
}
