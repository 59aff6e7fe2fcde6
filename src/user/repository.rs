//! User repository for database operations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;

use super::User;

/// Repository for user database operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching user")
    }

    /// Create a user. Used by provisioning and tests.
    #[instrument(skip(self))]
    pub async fn create(&self, username: &str) -> Result<User> {
        let result = sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.pool)
            .await
            .context("inserting user")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("user not found after insert")
    }
}
