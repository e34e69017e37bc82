//! Presence registry: which users currently hold at least one live connection.
//!
//! A user maps to a *set* of connection ids so that a second device never
//! evicts the first. All reads and writes go through one mutex; callers never
//! see the underlying maps.

use std::collections::{BTreeSet, HashMap};

use shared::domain::{ConnectionId, UserId};
use tokio::sync::Mutex;

/// Result of removing a connection from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    /// True when that was the user's last live connection.
    pub went_offline: bool,
}

#[derive(Default)]
struct PresenceState {
    by_user: HashMap<UserId, BTreeSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl PresenceState {
    fn detach(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let user_id = self.by_connection.remove(&connection_id)?;
        let went_offline = match self.by_user.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => true,
        };
        if went_offline {
            self.by_user.remove(&user_id);
        }
        Some(Departure {
            user_id,
            went_offline,
        })
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    state: Mutex<PresenceState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `connection_id` with `user_id`. Registering the same pair
    /// twice is a no-op; re-registering a connection under another user moves it.
    /// Returns true when the user was offline before this call.
    pub async fn register(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        if state.by_connection.get(&connection_id) == Some(&user_id) {
            return false;
        }
        state.detach(connection_id);
        state.by_connection.insert(connection_id, user_id);
        let connections = state.by_user.entry(user_id).or_default();
        let came_online = connections.is_empty();
        connections.insert(connection_id);
        came_online
    }

    /// Removes exactly this connection. `None` when it was never registered.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        self.state.lock().await.detach(connection_id)
    }

    /// Live connections for `user_id`; empty means offline.
    pub async fn lookup(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.state
            .lock()
            .await
            .by_user
            .get(&user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().await.by_user.contains_key(&user_id)
    }

    /// Users with at least one live connection, in ascending id order.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let state = self.state.lock().await;
        let mut online: Vec<UserId> = state.by_user.keys().copied().collect();
        online.sort();
        online
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.by_connection.len()
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
