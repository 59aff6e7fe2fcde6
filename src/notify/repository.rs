//! Notification repository for database operations.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::models::{NewNotification, Notification, NotificationKind};

/// Repository for notification database operations.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a notification row and return the stored record.
    #[instrument(skip(self, new))]
    pub async fn insert(&self, new: &NewNotification) -> Result<Notification> {
        let created_at = Utc::now().to_rfc3339();
        let data = serde_json::to_string(&new.data).context("serializing notification data")?;

        let result = sqlx::query(
            "INSERT INTO notifications (user_id, kind, title, body, data, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new.user_id)
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(&new.body)
        .bind(&data)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .context("inserting notification")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("notification not found after insert")
    }

    /// Get a notification by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT id, user_id, kind, title, body, data, read_at, created_at
             FROM notifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching notification")?;

        row.map(from_row).transpose()
    }

    /// A user's notifications, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, title, body, data, read_at, created_at
             FROM notifications WHERE user_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing notifications")?;

        rows.into_iter().map(from_row).collect()
    }

    /// Mark a notification read. Returns false when the id does not belong
    /// to the user or does not exist.
    #[instrument(skip(self))]
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ?
             WHERE id = ? AND user_id = ? AND read_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("marking notification read")?;

        Ok(result.rows_affected() > 0)
    }

    /// Count of a user's unread notifications.
    #[instrument(skip(self))]
    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("counting unread notifications")
    }
}

fn from_row(row: SqliteRow) -> Result<Notification> {
    let kind: String = row.try_get("kind")?;
    let kind = kind
        .parse::<NotificationKind>()
        .map_err(|e| anyhow::anyhow!(e))
        .context("decoding notification kind")?;

    let data: String = row.try_get("data")?;
    let data: Value = serde_json::from_str(&data).context("decoding notification data")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        data,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
    })
}
