use super::*;
use async_trait::async_trait;
use shared::error::UploadFailure;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
const DURABLE_URL: &str = "https://cdn.example/chat_images/pixel.png";

#[derive(Default)]
struct RecordingBlobStore {
    uploads: AtomicUsize,
    fail_with: Option<fn() -> UploadError>,
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn upload(&self, _image: &ImageUpload) -> Result<String, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(make_err) => Err(make_err()),
            None => Ok(DURABLE_URL.to_string()),
        }
    }
}

struct Fixture {
    ctx: ApiContext,
    blobs: Arc<RecordingBlobStore>,
    alice: UserId,
    bob: UserId,
}

async fn fixture_with(blobs: RecordingBlobStore) -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice", "Alice", None).await.expect("alice");
    let bob = storage.create_user("bob", "Bob", None).await.expect("bob");
    let blobs = Arc::new(blobs);
    let ctx = ApiContext {
        storage,
        blob_store: blobs.clone(),
        connections: ConnectionManager::default(),
    };
    Fixture {
        ctx,
        blobs,
        alice,
        bob,
    }
}

async fn fixture() -> Fixture {
    fixture_with(RecordingBlobStore::default()).await
}

fn drain(events: &mut mpsc::Receiver<ServerEvent>) {
    while events.try_recv().is_ok() {}
}

fn next_new_message(events: &mut mpsc::Receiver<ServerEvent>) -> Option<MessagePayload> {
    while let Ok(event) = events.try_recv() {
        if let ServerEvent::NewMessage { message } = event {
            return Some(message);
        }
    }
    None
}

#[tokio::test]
async fn list_users_excludes_caller() {
    let f = fixture().await;
    let users = list_users(&f.ctx, f.alice).await.expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, f.bob);
    assert_eq!(users[0].username, "bob");
}

#[tokio::test]
async fn connected_receiver_gets_push_and_message_is_fetchable() {
    let f = fixture().await;
    let (_bob_conn, mut bob_events) = f.ctx.connections.connect(Some(f.bob)).await;
    drain(&mut bob_events);

    let sent = send_message(&f.ctx, f.alice, f.bob, SendMessageRequest::text("hi"), None)
        .await
        .expect("send");

    let pushed = next_new_message(&mut bob_events).expect("push");
    assert_eq!(pushed.text, "hi");
    assert_eq!(pushed.sender_id, f.alice);
    assert_eq!(pushed.receiver_id, f.bob);
    assert_eq!(pushed, sent);

    let history = fetch_conversation(&f.ctx, f.alice, f.bob)
        .await
        .expect("history");
    assert_eq!(history, vec![sent]);
}

#[tokio::test]
async fn offline_receiver_still_gets_durable_message() {
    let f = fixture().await;
    let sent = send_message(
        &f.ctx,
        f.alice,
        f.bob,
        SendMessageRequest::text("see you later"),
        None,
    )
    .await
    .expect("send");

    let history = fetch_conversation(&f.ctx, f.bob, f.alice)
        .await
        .expect("history");
    assert_eq!(history, vec![sent]);
}

#[tokio::test]
async fn empty_message_is_rejected_before_any_side_effect() {
    let f = fixture().await;
    let (_bob_conn, mut bob_events) = f.ctx.connections.connect(Some(f.bob)).await;
    drain(&mut bob_events);

    for request in [
        SendMessageRequest::default(),
        SendMessageRequest {
            text: Some(String::new()),
            image: Some(String::new()),
        },
    ] {
        let err = send_message(&f.ctx, f.alice, f.bob, request, None)
            .await
            .expect_err("empty");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    assert_eq!(f.blobs.uploads.load(Ordering::SeqCst), 0);
    assert!(next_new_message(&mut bob_events).is_none());
    assert!(fetch_conversation(&f.ctx, f.alice, f.bob)
        .await
        .expect("history")
        .is_empty());
}

#[tokio::test]
async fn image_only_message_stores_durable_url() {
    let f = fixture().await;
    let sent = send_message(
        &f.ctx,
        f.alice,
        f.bob,
        SendMessageRequest::image(PIXEL_PNG),
        None,
    )
    .await
    .expect("send");

    assert_eq!(sent.text, "");
    assert_eq!(sent.image.as_deref(), Some(DURABLE_URL));
    assert_eq!(f.blobs.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_data_uri_image_is_a_validation_error() {
    let f = fixture().await;
    let err = send_message(
        &f.ctx,
        f.alice,
        f.bob,
        SendMessageRequest::image("https://elsewhere.example/cat.png"),
        None,
    )
    .await
    .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(f.blobs.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upload_failure_aborts_without_persisting() {
    let f = fixture_with(RecordingBlobStore {
        fail_with: Some(|| UploadError::Credentials("Invalid api_key".into())),
        ..Default::default()
    })
    .await;
    let (_bob_conn, mut bob_events) = f.ctx.connections.connect(Some(f.bob)).await;
    drain(&mut bob_events);

    let err = send_message(
        &f.ctx,
        f.alice,
        f.bob,
        SendMessageRequest {
            text: Some("look".into()),
            image: Some(PIXEL_PNG.into()),
        },
        None,
    )
    .await
    .expect_err("upload fails");
    assert_eq!(err.code, ErrorCode::UploadFailed);
    assert_eq!(err.reason, Some(UploadFailure::Credentials));
    assert!(next_new_message(&mut bob_events).is_none());
    assert!(fetch_conversation(&f.ctx, f.alice, f.bob)
        .await
        .expect("history")
        .is_empty());
}

#[tokio::test]
async fn storage_failure_is_reported_and_nothing_is_pushed() {
    let f = fixture().await;
    let (_bob_conn, mut bob_events) = f.ctx.connections.connect(Some(f.bob)).await;
    let (_alice_conn, mut alice_events) = f.ctx.connections.connect(Some(f.alice)).await;
    drain(&mut bob_events);
    drain(&mut alice_events);

    f.ctx.storage.pool().close().await;

    let err = send_message(&f.ctx, f.alice, f.bob, SendMessageRequest::text("lost"), None)
        .await
        .expect_err("storage closed");
    assert_eq!(err.code, ErrorCode::StorageFailed);
    assert!(next_new_message(&mut bob_events).is_none());
    assert!(next_new_message(&mut alice_events).is_none());

    let err = fetch_conversation(&f.ctx, f.alice, f.bob)
        .await
        .expect_err("storage closed");
    assert_eq!(err.code, ErrorCode::StorageFailed);
}

#[tokio::test]
async fn rate_limit_and_size_failures_keep_distinct_reasons() {
    let f = fixture_with(RecordingBlobStore {
        fail_with: Some(|| UploadError::RateLimited),
        ..Default::default()
    })
    .await;
    let err = send_message(&f.ctx, f.alice, f.bob, SendMessageRequest::image(PIXEL_PNG), None)
        .await
        .expect_err("rate limited");
    assert_eq!(err.reason, Some(UploadFailure::RateLimited));

    let f = fixture_with(RecordingBlobStore {
        fail_with: Some(|| UploadError::TooLarge {
            size: 11 * 1024 * 1024,
            limit: 10 * 1024 * 1024,
        }),
        ..Default::default()
    })
    .await;
    let err = send_message(&f.ctx, f.alice, f.bob, SendMessageRequest::image(PIXEL_PNG), None)
        .await
        .expect_err("too large");
    assert_eq!(err.reason, Some(UploadFailure::TooLarge));
}

#[tokio::test]
async fn sender_devices_are_synced_except_origin() {
    let f = fixture().await;
    let (alice_laptop, mut laptop_events) = f.ctx.connections.connect(Some(f.alice)).await;
    let (_alice_phone, mut phone_events) = f.ctx.connections.connect(Some(f.alice)).await;
    let (_bob_phone, mut bob_events) = f.ctx.connections.connect(Some(f.bob)).await;
    drain(&mut laptop_events);
    drain(&mut phone_events);
    drain(&mut bob_events);

    let sent = send_message(
        &f.ctx,
        f.alice,
        f.bob,
        SendMessageRequest::text("from laptop"),
        Some(alice_laptop.id()),
    )
    .await
    .expect("send");

    assert_eq!(next_new_message(&mut bob_events), Some(sent.clone()));
    assert_eq!(next_new_message(&mut phone_events), Some(sent));
    assert!(next_new_message(&mut laptop_events).is_none());
}

#[tokio::test]
async fn every_receiver_device_gets_the_push() {
    let f = fixture().await;
    let (_tablet, mut tablet_events) = f.ctx.connections.connect(Some(f.bob)).await;
    let (_desktop, mut desktop_events) = f.ctx.connections.connect(Some(f.bob)).await;
    drain(&mut tablet_events);
    drain(&mut desktop_events);

    let sent = send_message(&f.ctx, f.alice, f.bob, SendMessageRequest::text("both"), None)
        .await
        .expect("send");
    assert_eq!(next_new_message(&mut tablet_events), Some(sent.clone()));
    assert_eq!(next_new_message(&mut desktop_events), Some(sent));
}

#[tokio::test]
async fn conversation_preserves_send_order() {
    let f = fixture().await;
    let mut expected = Vec::new();
    for (from, to, text) in [
        (f.alice, f.bob, "one"),
        (f.bob, f.alice, "two"),
        (f.alice, f.bob, "three"),
    ] {
        expected.push(
            send_message(&f.ctx, from, to, SendMessageRequest::text(text), None)
                .await
                .expect("send"),
        );
    }
    let texts: Vec<String> = fetch_conversation(&f.ctx, f.bob, f.alice)
        .await
        .expect("history")
        .into_iter()
        .map(|message| message.text)
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
    assert_eq!(
        fetch_conversation(&f.ctx, f.alice, f.bob)
            .await
            .expect("history"),
        expected
    );
}
