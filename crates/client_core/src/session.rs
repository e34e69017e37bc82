//! Client-side conversation cache.
//!
//! The server is the source of truth. Opening a conversation replaces the
//! local list with a fresh fetch; sends append only after the server has
//! stored the message; pushes are appended only when they belong to the
//! open conversation and are dropped otherwise.

use std::{collections::BTreeSet, sync::Arc};

use shared::{
    domain::{ConnectionId, UserId},
    protocol::{MessagePayload, SendMessageRequest, ServerEvent, UserSummary},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    error::{ClientError, Result},
    push::ClientEvent,
};

/// What changed in the session, for whatever is rendering it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    ConversationLoaded {
        peer: UserId,
        messages: Vec<MessagePayload>,
    },
    MessageAdded(MessagePayload),
    OnlineUsersChanged(Vec<UserId>),
    PushLost(String),
}

#[derive(Default)]
struct SessionState {
    users: Vec<UserSummary>,
    open_peer: Option<UserId>,
    messages: Vec<MessagePayload>,
    online: BTreeSet<UserId>,
    connection_id: Option<ConnectionId>,
}

impl SessionState {
    fn contains(&self, message: &MessagePayload) -> bool {
        self.messages
            .iter()
            .any(|m| m.message_id == message.message_id)
    }
}

pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    me: UserId,
    inner: Mutex<SessionState>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ChatSession {
    pub fn new(api: Arc<dyn ChatApi>, me: UserId) -> Arc<Self> {
        let (updates, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            me,
            inner: Mutex::new(SessionState::default()),
            updates,
        })
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn load_users(&self) -> Result<Vec<UserSummary>> {
        let users = self.api.list_users().await?;
        self.inner.lock().await.users = users.clone();
        Ok(users)
    }

    pub async fn users(&self) -> Vec<UserSummary> {
        self.inner.lock().await.users.clone()
    }

    /// Fetches the conversation with `peer` and makes it the open one.
    /// On failure the previous conversation stays open and untouched.
    pub async fn open_conversation(&self, peer: UserId) -> Result<Vec<MessagePayload>> {
        let messages = self.api.fetch_conversation(peer).await?;
        {
            let mut guard = self.inner.lock().await;
            guard.open_peer = Some(peer);
            guard.messages = messages.clone();
        }
        info!(%peer, count = messages.len(), "conversation opened");
        let _ = self.updates.send(SessionUpdate::ConversationLoaded {
            peer,
            messages: messages.clone(),
        });
        Ok(messages)
    }

    pub async fn close_conversation(&self) {
        let mut guard = self.inner.lock().await;
        guard.open_peer = None;
        guard.messages.clear();
    }

    pub async fn open_peer(&self) -> Option<UserId> {
        self.inner.lock().await.open_peer
    }

    pub async fn messages(&self) -> Vec<MessagePayload> {
        self.inner.lock().await.messages.clone()
    }

    /// Sends to the open peer. The returned message is appended only once the
    /// server has accepted it; an error leaves the local list as it was.
    pub async fn send_message(&self, request: SendMessageRequest) -> Result<MessagePayload> {
        let (peer, origin) = {
            let guard = self.inner.lock().await;
            let peer = guard.open_peer.ok_or(ClientError::NoOpenConversation)?;
            (peer, guard.connection_id)
        };

        let message = self.api.send_message(peer, &request, origin).await?;

        let appended = {
            let mut guard = self.inner.lock().await;
            let still_open = guard.open_peer == Some(peer);
            let fresh = still_open && !guard.contains(&message);
            if fresh {
                guard.messages.push(message.clone());
            }
            fresh
        };
        if appended {
            let _ = self.updates.send(SessionUpdate::MessageAdded(message.clone()));
        }
        Ok(message)
    }

    /// Applies one push event. Returns true when local state changed.
    pub async fn handle_event(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Connected { connection_id } => {
                self.inner.lock().await.connection_id = Some(*connection_id);
                debug!(%connection_id, "push connection identified");
                true
            }
            ServerEvent::GetOnlineUsers { user_ids } => {
                self.inner.lock().await.online = user_ids.iter().copied().collect();
                let _ = self
                    .updates
                    .send(SessionUpdate::OnlineUsersChanged(user_ids.clone()));
                true
            }
            ServerEvent::NewMessage { message } => {
                let accepted = {
                    let mut guard = self.inner.lock().await;
                    let Some(peer) = guard.open_peer else {
                        return false;
                    };
                    let from_peer = message.sender_id == peer && message.receiver_id == self.me;
                    let own_echo = message.sender_id == self.me && message.receiver_id == peer;
                    let accept = (from_peer || own_echo) && !guard.contains(message);
                    if accept {
                        guard.messages.push(message.clone());
                    }
                    accept
                };
                if accepted {
                    let _ = self
                        .updates
                        .send(SessionUpdate::MessageAdded(message.clone()));
                } else {
                    debug!(message_id = %message.message_id, "push outside open conversation dropped");
                }
                accepted
            }
        }
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner.lock().await.online.iter().copied().collect()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.lock().await.online.contains(&user_id)
    }

    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.lock().await.connection_id
    }

    /// Feeds push events from `events` into this session until the returned
    /// handle is dropped or unsubscribed.
    pub fn subscribe(self: &Arc<Self>, mut events: broadcast::Receiver<ClientEvent>) -> Subscription {
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Server(event)) => {
                        session.handle_event(&event).await;
                    }
                    Ok(ClientEvent::Error(err)) => warn!(error = %err, "push stream error"),
                    Ok(ClientEvent::Disconnected) => {
                        session.push_lost("push connection closed").await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session lagged behind push events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        session.push_lost("push channel closed").await;
                        break;
                    }
                }
            }
        });
        Subscription { task: Some(task) }
    }

    async fn push_lost(&self, reason: &str) {
        {
            let mut guard = self.inner.lock().await;
            guard.connection_id = None;
            guard.online.clear();
        }
        let _ = self.updates.send(SessionUpdate::PushLost(reason.to_string()));
    }
}

/// Registration of a session on a push stream.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
