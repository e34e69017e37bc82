//! Connection lifecycle: `Connecting -> Identified -> Closed`.
//!
//! Every connect and disconnect mutates the presence registry and then
//! broadcasts the resulting online set. Both steps run under one gate so the
//! last broadcast any client sees always matches the registry.

use std::sync::Arc;

use shared::{
    domain::{ConnectionId, UserId},
    protocol::ServerEvent,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::{outbound::Outbound, presence::PresenceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Identified,
    Closed,
}

/// Server-side view of one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: Option<UserId>,
    state: ConnectionState,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

struct ManagerInner {
    presence: PresenceRegistry,
    outbound: Outbound,
    gate: Mutex<()>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                presence: PresenceRegistry::new(),
                outbound: Outbound::new(queue_capacity),
                gate: Mutex::new(()),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Opens a connection. `identity` is the caller's verified user id; a
    /// connection without one stays `Connecting`, receives broadcasts, and
    /// never appears in presence.
    pub async fn connect(
        &self,
        identity: Option<UserId>,
    ) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let _gate = self.inner.gate.lock().await;
        let (id, events) = self.inner.outbound.open().await;
        let mut handle = ConnectionHandle {
            id,
            user_id: None,
            state: ConnectionState::Connecting,
        };
        self.inner
            .outbound
            .emit(id, ServerEvent::Connected { connection_id: id })
            .await;

        if let Some(user_id) = identity {
            let came_online = self.inner.presence.register(user_id, id).await;
            handle.user_id = Some(user_id);
            handle.state = ConnectionState::Identified;
            info!(connection_id = %id, %user_id, came_online, "connection identified");
        } else {
            info!(connection_id = %id, "connection opened without identity");
        }

        self.broadcast_online_users().await;
        (handle, events)
    }

    /// Closes a connection and re-broadcasts presence. Closing twice is a no-op.
    pub async fn disconnect(&self, handle: &mut ConnectionHandle) {
        if handle.state == ConnectionState::Closed {
            return;
        }
        let _gate = self.inner.gate.lock().await;
        self.inner.outbound.close(handle.id).await;
        let departure = self.inner.presence.unregister(handle.id).await;
        handle.state = ConnectionState::Closed;
        match departure {
            Some(departure) => info!(
                connection_id = %handle.id,
                user_id = %departure.user_id,
                went_offline = departure.went_offline,
                "connection closed"
            ),
            None => info!(connection_id = %handle.id, "anonymous connection closed"),
        }
        self.broadcast_online_users().await;
    }

    /// Pushes `event` to every live connection of `user_id` except `skip`.
    /// Returns the number of connections that accepted it; zero means offline.
    pub async fn push_to_user(
        &self,
        user_id: UserId,
        event: &ServerEvent,
        skip: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for connection_id in self.inner.presence.lookup(user_id).await {
            if Some(connection_id) == skip {
                continue;
            }
            if self.inner.outbound.emit(connection_id, event.clone()).await {
                delivered += 1;
            }
        }
        debug!(%user_id, delivered, event = event.name(), "pushed event to user");
        delivered
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner.presence.snapshot().await
    }

    pub async fn open_connections(&self) -> usize {
        self.inner.outbound.len().await
    }

    async fn broadcast_online_users(&self) {
        let user_ids = self.inner.presence.snapshot().await;
        let event = ServerEvent::GetOnlineUsers { user_ids };
        let delivered = self.inner.outbound.broadcast(&event).await;
        debug!(delivered, "broadcast online users");
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(crate::outbound::DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
