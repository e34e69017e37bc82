use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{ConnectionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{MessagePayload, SendMessageRequest, UserSummary, CONNECTION_ID_HEADER},
};

use crate::error::{ClientError, Result};

/// Request/response half of the chat surface.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserSummary>>;
    async fn fetch_conversation(&self, peer: UserId) -> Result<Vec<MessagePayload>>;
    /// `origin` names this client's push connection so the server skips echoing to it.
    async fn send_message(
        &self,
        receiver: UserId,
        request: &SendMessageRequest,
        origin: Option<ConnectionId>,
    ) -> Result<MessagePayload>;
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ClientError::InvalidServerUrl(server_url));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
            token: token.into(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let response = self
            .http
            .get(format!("{}/api/messages/users", self.server_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }

    async fn fetch_conversation(&self, peer: UserId) -> Result<Vec<MessagePayload>> {
        let response = self
            .http
            .get(format!("{}/api/messages/{peer}", self.server_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }

    async fn send_message(
        &self,
        receiver: UserId,
        request: &SendMessageRequest,
        origin: Option<ConnectionId>,
    ) -> Result<MessagePayload> {
        let mut builder = self
            .http
            .post(format!("{}/api/messages/send/{receiver}", self.server_url))
            .bearer_auth(&self.token)
            .json(request);
        if let Some(origin) = origin {
            builder = builder.header(CONNECTION_ID_HEADER, origin.to_string());
        }
        let response = builder.send().await?;
        Ok(checked(response).await?.json().await?)
    }
}

async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let error = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        ApiError::new(ErrorCode::Internal, message)
    });
    Err(ClientError::Api {
        status: status.as_u16(),
        error,
    })
}
