use std::collections::HashMap;

use shared::{domain::ConnectionId, protocol::ServerEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-connection outbound queues. Pushes never block: a full or closed queue
/// drops the event for that connection only.
pub struct Outbound {
    capacity: usize,
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
}

impl Outbound {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut senders = self.senders.write().await;
        let mut connection_id = ConnectionId::new_random();
        while senders.contains_key(&connection_id) {
            connection_id = ConnectionId::new_random();
        }
        senders.insert(connection_id, tx);
        (connection_id, rx)
    }

    pub async fn close(&self, connection_id: ConnectionId) -> bool {
        self.senders.write().await.remove(&connection_id).is_some()
    }

    /// Queues `event` for one connection. False when it could not be queued.
    pub async fn emit(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let senders = self.senders.read().await;
        let Some(tx) = senders.get(&connection_id) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(%connection_id, event = event.name(), "outbound queue full; dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queues `event` on every open connection; returns how many accepted it.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let senders = self.senders.read().await;
        let mut delivered = 0;
        for (connection_id, tx) in senders.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%connection_id, event = event.name(), "outbound queue full; dropping broadcast");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.senders.read().await.is_empty()
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
