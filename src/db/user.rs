//! User repository

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{DbPool, connection, parse_datetime};
use crate::Result;

/// A conversation owner
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a user by ID (returns None if not found)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: &str) -> Result<Option<User>> {
        let conn = connection(&self.pool)?;

        let user = conn
            .query_row(
                "SELECT id, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        created_at: parse_datetime(&row.get::<_, String>(1)?),
                    })
                },
            )
            .optional()?;

        Ok(user)
    }

    /// Create a user with a freshly generated identity token
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self) -> Result<User> {
        let conn = connection(&self.pool)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, created_at) VALUES (?1, ?2)",
            [&id, &now.to_rfc3339()],
        )?;

        tracing::info!(user_id = %id, "created user");
        Ok(User { id, created_at: now })
    }

    /// Resolve the caller's identity, creating a user when it is absent or unknown
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn resolve(&self, id: Option<&str>) -> Result<User> {
        if let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(user) = self.find(id)? {
                return Ok(user);
            }
            tracing::debug!(user_id = id, "unknown identity token, issuing a new one");
        }
        self.create()
    }
}
