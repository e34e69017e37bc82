//! Push half of the chat surface: one WebSocket whose server events are
//! republished on a broadcast channel.

use futures::StreamExt;
use shared::protocol::ServerEvent;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, Result};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Server(ServerEvent),
    Disconnected,
    Error(String),
}

pub struct PushConnection {
    events: broadcast::Sender<ClientEvent>,
    reader: JoinHandle<()>,
}

impl PushConnection {
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stops reading the socket. Dropping the connection does the same.
    pub fn close(self) {}
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub fn push_url(server_url: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).map_err(|_| ClientError::InvalidServerUrl(server_url.into()))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return Err(ClientError::InvalidServerUrl(server_url.into())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::InvalidServerUrl(server_url.into()))?;
    url.set_path("/ws");
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

/// Opens the push socket. The returned receiver sees every event from the
/// first frame on; later `subscribe` calls only see what follows them.
pub async fn connect_push(
    server_url: &str,
    token: &str,
) -> Result<(PushConnection, broadcast::Receiver<ClientEvent>)> {
    let url = push_url(server_url, token)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (_, mut ws_reader) = ws_stream.split();
    let (events, first_rx) = broadcast::channel(EVENT_BUFFER);

    let tx = events.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        debug!(event = event.name(), "push event received");
                        let _ = tx.send(ClientEvent::Server(event));
                    }
                    Err(err) => {
                        warn!(error = %err, "invalid server event");
                        let _ = tx.send(ClientEvent::Error(format!("invalid server event: {err}")));
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    let _ = tx.send(ClientEvent::Error(format!(
                        "websocket receive failed: {err}"
                    )));
                    break;
                }
            }
        }
        let _ = tx.send(ClientEvent::Disconnected);
    });

    Ok((PushConnection { events, reader }, first_rx))
}
