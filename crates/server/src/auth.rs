//! Caller identity for HTTP routes and the push socket.
//!
//! A session token is accepted from `Authorization: Bearer`, the `jwt`
//! cookie, or a `token` query parameter (browsers cannot set headers on a
//! WebSocket handshake).

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap},
};
use serde::Deserialize;
use server_api::auth::verify_token;
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};

use crate::{
    app_state::AppState,
    error::{http_error, HttpError},
};

const SESSION_COOKIE: &str = "jwt";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenQuery {
    pub(crate) token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthUser(pub(crate) UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        let token = session_token(&parts.headers, query).ok_or_else(|| {
            http_error(ApiError::new(
                ErrorCode::Unauthorized,
                "Unauthorized - No Token Provided",
            ))
        })?;
        verify_token(&state.session, &token)
            .map(AuthUser)
            .map_err(http_error)
    }
}

pub(crate) fn session_token(headers: &HeaderMap, query: TokenQuery) -> Option<String> {
    bearer_token(headers)
        .or_else(|| cookie_token(headers))
        .or_else(|| query.token.filter(|token| !token.is_empty()))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
}
