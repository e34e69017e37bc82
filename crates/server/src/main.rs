use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use blob_store::{BlobStore, CloudinaryBlobStore, CloudinaryConfig, MissingBlobStore};
use server_api::{
    auth::SessionConfig, fetch_conversation, list_users, send_message, ApiContext,
    ConnectionManager,
};
use shared::{
    domain::{ConnectionId, UserId},
    protocol::{MessagePayload, SendMessageRequest, UserSummary, CONNECTION_ID_HEADER},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod app_state;
mod auth;
mod config;
mod error;
mod ws;

use app_state::AppState;
use auth::AuthUser;
use config::{load_settings, prepare_database_url, Settings};
use error::{http_error, HttpError};

/// Request bodies carry base64 images, which inflate the raw limit by about a third.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let api = ApiContext {
        storage,
        blob_store: blob_store_from(&settings),
        connections: ConnectionManager::new(settings.push_queue_capacity),
    };
    let session = SessionConfig {
        secret: settings.jwt_secret.clone(),
        ttl_seconds: settings.token_ttl_seconds,
    };

    let app = build_router(Arc::new(AppState {
        api,
        session,
        heartbeat: settings.heartbeat(),
    }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn blob_store_from(settings: &Settings) -> Arc<dyn BlobStore> {
    match settings.cloudinary_credentials() {
        Some((cloud_name, api_key, api_secret)) => {
            let mut config = CloudinaryConfig::new(cloud_name, api_key, api_secret);
            config.folder = settings.upload_folder.clone();
            config.max_image_bytes = settings.max_image_bytes;
            info!(cloud_name = %config.cloud_name, folder = %config.folder, "image uploads enabled");
            Arc::new(CloudinaryBlobStore::new(config))
        }
        None => {
            warn!("cloudinary credentials missing; image messages will be rejected");
            Arc::new(MissingBlobStore)
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/messages/users", get(http_list_users))
        .route("/api/messages/:peer_id", get(http_fetch_conversation))
        .route("/api/messages/send/:receiver_id", post(http_send_message))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_list_users(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<UserSummary>>, HttpError> {
    let users = list_users(&state.api, caller).await.map_err(http_error)?;
    Ok(Json(users))
}

async fn http_fetch_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(peer_id): Path<i64>,
) -> Result<Json<Vec<MessagePayload>>, HttpError> {
    let messages = fetch_conversation(&state.api, caller, UserId(peer_id))
        .await
        .map_err(http_error)?;
    Ok(Json(messages))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(sender): AuthUser,
    Path(receiver_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), HttpError> {
    let origin = headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<ConnectionId>().ok());
    let message = send_message(&state.api, sender, UserId(receiver_id), req, origin)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
