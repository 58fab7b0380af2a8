//! Bearer token authentication
//!
//! Enabled only when `require_auth_token` is configured.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::handlers::HttpError;
use crate::state::AppState;

/// Reject requests without the configured bearer token
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.require_auth_token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = bearer_token(request.headers()).is_some_and(|t| tokens_match(t, expected));
    if authorized {
        return next.run(request).await;
    }

    tracing::warn!("Rejected unauthenticated {} {}", request.method(), request.uri());
    HttpError::Unauthorized.into_response()
}

/// Extract the token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Compare without short-circuiting on the first differing byte
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
