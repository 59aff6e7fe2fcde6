//! Notification dispatcher: persist, then fan out to live connections.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;
use tracing::instrument;

use super::models::{NewNotification, Notification};
use super::repository::NotificationRepository;
use crate::ws::{Hub, ServerEvent};

/// Creates notifications and pushes them to whoever is online.
///
/// Persistence is the source of truth; real-time delivery is best-effort
/// with no retry or offline queue. A user who is offline picks the
/// notification up from the store later.
#[derive(Clone)]
pub struct NotificationService {
    repo: NotificationRepository,
    hub: Arc<Hub>,
}

impl NotificationService {
    pub fn new(repo: NotificationRepository, hub: Arc<Hub>) -> Self {
        Self { repo, hub }
    }

    /// Persist a notification, then attempt real-time delivery unless the
    /// caller opted out. A failed or skipped delivery never fails the call:
    /// the row is already durable.
    #[instrument(skip(self, new), fields(user_id = new.user_id, kind = %new.kind))]
    pub async fn create_notification(&self, new: NewNotification) -> Result<Notification> {
        let stored = self
            .repo
            .insert(&new)
            .await
            .context("persisting notification")?;

        if new.send_real_time {
            self.send_real_time(&stored).await;
        }

        Ok(stored)
    }

    /// Push one stored notification to every open connection of its user.
    ///
    /// Offline users are a silent no-op. A connection whose write fails is
    /// dropped from the hub so the next dispatch only sees live sockets;
    /// `Connection::send` has already torn the socket down by then.
    pub async fn send_real_time(&self, notification: &Notification) {
        let connections = self.hub.connections(notification.user_id);
        if connections.is_empty() {
            return;
        }

        let envelope = match serde_json::to_string(&ServerEvent::Notification {
            data: notification,
        }) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to encode notification {}: {}", notification.id, err);
                return;
            }
        };

        for conn in connections {
            if !conn.is_open() {
                continue;
            }
            if let Err(err) = conn.send(&envelope).await {
                warn!(
                    "dropping dead connection {} for user {}: {}",
                    conn.id(),
                    notification.user_id,
                    err
                );
                self.hub.unsubscribe(notification.user_id, conn.id());
            } else {
                debug!(
                    "delivered notification {} to connection {}",
                    notification.id,
                    conn.id()
                );
            }
        }
    }
}
