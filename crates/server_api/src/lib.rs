use std::sync::Arc;

use blob_store::{is_image_data_uri, BlobStore, ImageUpload, UploadError};
use shared::{
    domain::{ConnectionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{MessagePayload, SendMessageRequest, ServerEvent, UserSummary},
};
use storage::{NewMessage, Storage};
use tracing::{error, info, warn};

pub mod auth;
pub mod lifecycle;
pub mod outbound;
pub mod presence;

pub use lifecycle::{ConnectionHandle, ConnectionManager, ConnectionState};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub blob_store: Arc<dyn BlobStore>,
    pub connections: ConnectionManager,
}

pub async fn list_users(ctx: &ApiContext, caller: UserId) -> Result<Vec<UserSummary>, ApiError> {
    let users = ctx
        .storage
        .list_users_except(caller)
        .await
        .map_err(storage_failed)?;
    Ok(users.into_iter().map(UserSummary::from).collect())
}

pub async fn fetch_conversation(
    ctx: &ApiContext,
    caller: UserId,
    peer: UserId,
) -> Result<Vec<MessagePayload>, ApiError> {
    let messages = ctx
        .storage
        .list_conversation(caller, peer)
        .await
        .map_err(storage_failed)?;
    Ok(messages.into_iter().map(MessagePayload::from).collect())
}

/// Validates, externalises any image, persists, then pushes to the receiver's
/// connections and the sender's other connections. Push outcome never affects
/// the result: the stored message is returned as soon as it is durable.
pub async fn send_message(
    ctx: &ApiContext,
    sender_id: UserId,
    receiver_id: UserId,
    request: SendMessageRequest,
    origin: Option<ConnectionId>,
) -> Result<MessagePayload, ApiError> {
    if request.is_empty() {
        return Err(ApiError::validation("Message cannot be empty"));
    }

    let image_url = match request.image.as_deref().filter(|image| !image.is_empty()) {
        Some(data_uri) => Some(upload_image(ctx, data_uri).await?),
        None => None,
    };
    let text = request.text.unwrap_or_default();

    let stored = ctx
        .storage
        .insert_message(&NewMessage {
            sender_id,
            receiver_id,
            text: &text,
            image: image_url.as_deref(),
        })
        .await
        .map_err(storage_failed)?;
    let message = MessagePayload::from(stored);
    info!(
        message_id = %message.message_id,
        %sender_id,
        %receiver_id,
        has_image = message.image.is_some(),
        "message stored"
    );

    let event = ServerEvent::NewMessage {
        message: message.clone(),
    };
    let to_receiver = ctx
        .connections
        .push_to_user(receiver_id, &event, origin)
        .await;
    if to_receiver == 0 {
        info!(message_id = %message.message_id, %receiver_id, "receiver offline; message kept for later fetch");
    }
    if sender_id != receiver_id {
        ctx.connections
            .push_to_user(sender_id, &event, origin)
            .await;
    }

    Ok(message)
}

async fn upload_image(ctx: &ApiContext, data_uri: &str) -> Result<String, ApiError> {
    if !is_image_data_uri(data_uri) {
        return Err(ApiError::validation(
            "Invalid image format: must be base64 encoded with data URI (data:image/...)",
        ));
    }
    let image = ImageUpload::from_data_uri(data_uri, ctx.blob_store.max_image_bytes())
        .map_err(|e| match e {
            UploadError::InvalidFormat(detail) => {
                ApiError::validation(format!("Invalid image format: {detail}"))
            }
            other => ApiError::upload(other.failure()),
        })?;
    ctx.blob_store.upload(&image).await.map_err(|e| {
        warn!(error = %e, mime_type = %image.mime_type, "image upload failed");
        ApiError::upload(e.failure())
    })
}

fn storage_failed(err: anyhow::Error) -> ApiError {
    error!(error = %err, "storage operation failed");
    ApiError::new(ErrorCode::StorageFailed, "storage operation failed")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
