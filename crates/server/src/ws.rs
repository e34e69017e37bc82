use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use server_api::auth::verify_token;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    app_state::AppState,
    auth::{session_token, TokenQuery},
    error::http_error,
};

/// Upgrades to the push socket. Without a token the socket still opens and
/// receives broadcasts, but never counts as online; a bad token is refused.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let identity = match session_token(&headers, query) {
        Some(token) => match verify_token(&state.session, &token) {
            Ok(user_id) => Some(user_id),
            Err(err) => return http_error(err).into_response(),
        },
        None => None,
    };
    ws.on_upgrade(move |socket| ws_connection(state, socket, identity))
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    identity: Option<shared::domain::UserId>,
) {
    let connections = state.api.connections.clone();
    let (mut handle, mut events_rx) = connections.connect(identity).await;
    let connection_id = handle.id();
    let (mut sender, mut receiver) = socket.split();
    let heartbeat = state.heartbeat;

    let mut send_task = tokio::spawn(async move {
        let mut ping = interval(heartbeat.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;
        loop {
            let frame = tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&event) {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            warn!(%connection_id, error = %e, "failed to encode server event");
                            continue;
                        }
                    }
                }
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Any inbound frame, pongs included, counts as liveness.
    let mut recv_task = tokio::spawn(async move {
        loop {
            match timeout(heartbeat.idle_timeout, receiver.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Err(_) => {
                    debug!(%connection_id, "push socket idle; closing");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    connections.disconnect(&mut handle).await;
    debug!(%connection_id, "push socket finished");
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
