use super::*;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{
    domain::MessageId,
    error::{ApiError, ErrorCode},
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

const ME: UserId = UserId(1);
const PEER: UserId = UserId(2);
const OTHER: UserId = UserId(3);

fn message(id: i64, sender: UserId, receiver: UserId, text: &str) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        sender_id: sender,
        receiver_id: receiver,
        text: text.into(),
        image: None,
        created_at: Utc
            .timestamp_opt(1_700_000_000 + id, 0)
            .single()
            .expect("timestamp"),
    }
}

#[derive(Default)]
struct FakeChatApi {
    history: Mutex<Vec<MessagePayload>>,
    next_id: AtomicI64,
    reject_sends: bool,
    origins: Mutex<Vec<Option<ConnectionId>>>,
}

impl FakeChatApi {
    fn with_history(history: Vec<MessagePayload>) -> Self {
        Self {
            next_id: AtomicI64::new(history.len() as i64),
            history: Mutex::new(history),
            ..Self::default()
        }
    }

    fn rejecting() -> Self {
        Self {
            reject_sends: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        Ok(vec![UserSummary {
            user_id: PEER,
            username: "peer".into(),
            full_name: "Peer".into(),
            profile_pic: None,
        }])
    }

    async fn fetch_conversation(&self, peer: UserId) -> Result<Vec<MessagePayload>> {
        Ok(self
            .history
            .lock()
            .await
            .iter()
            .filter(|m| m.is_between(ME, peer))
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        receiver: UserId,
        request: &SendMessageRequest,
        origin: Option<ConnectionId>,
    ) -> Result<MessagePayload> {
        self.origins.lock().await.push(origin);
        if self.reject_sends || request.is_empty() {
            return Err(ClientError::Api {
                status: 400,
                error: ApiError::new(ErrorCode::Validation, "Message cannot be empty"),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = message(id, ME, receiver, request.text.as_deref().unwrap_or_default());
        self.history.lock().await.push(stored.clone());
        Ok(stored)
    }
}

#[tokio::test]
async fn opening_replaces_local_list_with_fetched_conversation() {
    let api = Arc::new(FakeChatApi::with_history(vec![
        message(1, PEER, ME, "hi"),
        message(2, OTHER, ME, "not this one"),
        message(3, ME, PEER, "hello"),
    ]));
    let session = ChatSession::new(api, ME);

    session.open_conversation(OTHER).await.expect("open other");
    assert_eq!(session.messages().await.len(), 1);

    let opened = session.open_conversation(PEER).await.expect("open peer");
    let ids: Vec<i64> = opened.iter().map(|m| m.message_id.0).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(session.messages().await, opened);
    assert_eq!(session.open_peer().await, Some(PEER));
}

#[tokio::test]
async fn send_appends_only_after_server_confirms() {
    let api = Arc::new(FakeChatApi::default());
    let session = ChatSession::new(api, ME);
    session.open_conversation(PEER).await.expect("open");

    let sent = session
        .send_message(SendMessageRequest::text("hi"))
        .await
        .expect("send");
    assert_eq!(session.messages().await, vec![sent]);
}

#[tokio::test]
async fn failed_send_leaves_local_list_untouched() {
    let api = Arc::new(FakeChatApi::rejecting());
    let session = ChatSession::new(api, ME);
    session.open_conversation(PEER).await.expect("open");

    let err = session
        .send_message(SendMessageRequest::text("hi"))
        .await
        .expect_err("rejected");
    assert_eq!(
        err.api_error().map(|e| e.code),
        Some(ErrorCode::Validation)
    );
    assert!(session.messages().await.is_empty());
}

#[tokio::test]
async fn send_without_open_conversation_is_refused() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    let err = session
        .send_message(SendMessageRequest::text("hi"))
        .await
        .expect_err("no conversation");
    assert!(matches!(err, ClientError::NoOpenConversation));
}

#[tokio::test]
async fn send_passes_push_connection_id_as_origin() {
    let api = Arc::new(FakeChatApi::default());
    let session = ChatSession::new(api.clone(), ME);
    let connection_id = ConnectionId::new_random();
    session
        .handle_event(&ServerEvent::Connected { connection_id })
        .await;
    session.open_conversation(PEER).await.expect("open");
    session
        .send_message(SendMessageRequest::text("hi"))
        .await
        .expect("send");

    assert_eq!(*api.origins.lock().await, vec![Some(connection_id)]);
}

#[tokio::test]
async fn pushes_outside_open_conversation_are_dropped() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    let from_peer = ServerEvent::NewMessage {
        message: message(10, PEER, ME, "before open"),
    };
    assert!(!session.handle_event(&from_peer).await);

    session.open_conversation(PEER).await.expect("open");
    let from_other = ServerEvent::NewMessage {
        message: message(11, OTHER, ME, "elsewhere"),
    };
    assert!(!session.handle_event(&from_other).await);

    let from_peer = ServerEvent::NewMessage {
        message: message(12, PEER, ME, "hi"),
    };
    assert!(session.handle_event(&from_peer).await);
    assert_eq!(session.messages().await.len(), 1);
}

#[tokio::test]
async fn own_echo_from_other_device_is_appended_once() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    session.open_conversation(PEER).await.expect("open");

    let echo = ServerEvent::NewMessage {
        message: message(20, ME, PEER, "from my phone"),
    };
    assert!(session.handle_event(&echo).await);
    assert!(!session.handle_event(&echo).await);
    assert_eq!(session.messages().await.len(), 1);
}

#[tokio::test]
async fn presence_snapshot_replaces_online_set() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    session
        .handle_event(&ServerEvent::GetOnlineUsers {
            user_ids: vec![ME, PEER],
        })
        .await;
    assert!(session.is_online(PEER).await);

    session
        .handle_event(&ServerEvent::GetOnlineUsers { user_ids: vec![ME] })
        .await;
    assert!(!session.is_online(PEER).await);
    assert_eq!(session.online_users().await, vec![ME]);
}

#[tokio::test]
async fn closing_conversation_stops_accepting_pushes() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    session.open_conversation(PEER).await.expect("open");
    session.close_conversation().await;

    let from_peer = ServerEvent::NewMessage {
        message: message(30, PEER, ME, "late"),
    };
    assert!(!session.handle_event(&from_peer).await);
    assert!(session.messages().await.is_empty());
    assert_eq!(session.open_peer().await, None);
}

#[tokio::test]
async fn subscription_feeds_session_until_dropped() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    session.open_conversation(PEER).await.expect("open");
    let mut updates = session.updates();

    let (tx, rx) = broadcast::channel(16);
    let subscription = session.subscribe(rx);
    assert!(subscription.is_active());

    tx.send(ClientEvent::Server(ServerEvent::NewMessage {
        message: message(40, PEER, ME, "live"),
    }))
    .expect("send");
    let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("update before timeout")
        .expect("update");
    assert!(matches!(update, SessionUpdate::MessageAdded(ref m) if m.text == "live"));

    drop(subscription);
    tokio::task::yield_now().await;
    let _ = tx.send(ClientEvent::Server(ServerEvent::NewMessage {
        message: message(41, PEER, ME, "after unsubscribe"),
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.messages().await.len(), 1);
}

#[tokio::test]
async fn lost_push_clears_presence_and_connection() {
    let session = ChatSession::new(Arc::new(FakeChatApi::default()), ME);
    let mut updates = session.updates();
    let (tx, rx) = broadcast::channel(16);
    let subscription = session.subscribe(rx);

    tx.send(ClientEvent::Server(ServerEvent::GetOnlineUsers {
        user_ids: vec![ME, PEER],
    }))
    .expect("send");
    tx.send(ClientEvent::Disconnected).expect("send");

    loop {
        let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("update before timeout")
            .expect("update");
        if matches!(update, SessionUpdate::PushLost(_)) {
            break;
        }
    }
    assert!(session.online_users().await.is_empty());
    assert_eq!(session.connection_id().await, None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!subscription.is_active());
}
