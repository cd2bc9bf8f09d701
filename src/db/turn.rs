//! Turn repository: the mood history

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DbPool, connection, parse_datetime};
use crate::Result;
use crate::tone::Tone;

/// A persisted turn
#[derive(Debug, Clone)]
pub struct StoredTurn {
    pub id: String,
    pub user_id: String,
    pub input_text: String,
    pub tone: Tone,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Turn repository
#[derive(Clone)]
pub struct TurnRepo {
    pool: DbPool,
}

impl TurnRepo {
    /// Create a new turn repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store a turn for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(
        &self,
        user_id: &str,
        input_text: &str,
        tone: Tone,
        response: &str,
    ) -> Result<StoredTurn> {
        let conn = connection(&self.pool)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO turns (id, user_id, input_text, tone, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            [
                id.as_str(),
                user_id,
                input_text,
                tone.as_str(),
                response,
                &now.to_rfc3339(),
            ],
        )?;

        Ok(StoredTurn {
            id,
            user_id: user_id.to_string(),
            input_text: input_text.to_string(),
            tone,
            response: response.to_string(),
            created_at: now,
        })
    }

    /// All turns for a user, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredTurn>> {
        let conn = connection(&self.pool)?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, input_text, tone, response, created_at
             FROM turns WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let turns = stmt
            .query_map([user_id], |row| {
                Ok(StoredTurn {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    input_text: row.get(2)?,
                    tone: Tone::parse_lenient(&row.get::<_, String>(3)?),
                    response: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(turns)
    }
}
