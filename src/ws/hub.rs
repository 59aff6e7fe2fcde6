//! Subscription registry mapping user ids to their live connections.
//!
//! The hub is constructor-created and passed around by `Arc` so tests and a
//! future multi-instance backplane can run isolated instances; there is no
//! module-level singleton. State is in-memory only and rebuilt purely from
//! live traffic.

use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::Connection;

/// In-memory index from user id to that user's open connections.
///
/// Membership is set-based (keyed by connection id), so duplicate subscribe
/// calls for the same pair are harmless, and multiple connections per user
/// (tabs, devices) are expected.
#[derive(Default)]
pub struct Hub {
    connections: DashMap<i64, HashMap<u64, Arc<Connection>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection under its user id and attach the one-shot
    /// close hook that unsubscribes it. The hook is the sole cleanup path,
    /// so it fires for every termination reason: graceful close, socket
    /// error, or protocol violation.
    pub fn subscribe(self: &Arc<Self>, conn: Arc<Connection>) {
        let user_id = conn.user_id();
        let conn_id = conn.id();

        self.connections
            .entry(user_id)
            .or_default()
            .insert(conn_id, conn.clone());

        let hub = self.clone();
        conn.on_close(move || {
            hub.unsubscribe(user_id, conn_id);
        });

        info!(
            "subscribed connection {} for user {} ({} open)",
            conn_id,
            user_id,
            self.connection_count(user_id)
        );
    }

    /// Remove a connection from its user's set, dropping the map entry once
    /// the set becomes empty.
    pub fn unsubscribe(&self, user_id: i64, conn_id: u64) {
        let mut empty = false;
        if let Some(mut entry) = self.connections.get_mut(&user_id) {
            if entry.remove(&conn_id).is_some() {
                debug!("unsubscribed connection {} for user {}", conn_id, user_id);
            }
            empty = entry.is_empty();
        }
        if empty {
            self.connections
                .remove_if(&user_id, |_, conns| conns.is_empty());
        }
    }

    /// Snapshot of a user's live connections. Returns an empty vec for an
    /// unknown user; offline is the expected steady state, not an error.
    pub fn connections(&self, user_id: i64) -> Vec<Arc<Connection>> {
        self.connections
            .get(&user_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live connections for a user.
    pub fn connection_count(&self, user_id: i64) -> usize {
        self.connections
            .get(&user_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Number of users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.connections.len()
    }
}
