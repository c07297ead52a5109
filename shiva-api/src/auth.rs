//! Organizer credentials at the boundary.
//!
//! A magic-link token may arrive as `?token=`, as an `Authorization: Bearer`
//! header or as a `magic_token` / `token` field of the JSON body, checked in
//! that order. Validating it is left to `shiva_core::authorize`.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use shiva_core::ShivaError;

use crate::error::ApiResult;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
    /// Approved access-request token for private pages.
    pub access: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract the token from an `Authorization: Bearer` header.
pub fn bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    non_empty(header.strip_prefix("Bearer "))
}

fn from_body(body: &serde_json::Value) -> Option<String> {
    ["magic_token", "token"]
        .iter()
        .find_map(|field| non_empty(body.get(*field).and_then(|v| v.as_str())))
}

pub fn organizer_token(
    headers: &HeaderMap,
    query: &TokenQuery,
    body: Option<&serde_json::Value>,
) -> Option<String> {
    non_empty(query.token.as_deref())
        .or_else(|| bearer(headers))
        .or_else(|| body.and_then(from_body))
}

pub fn require_token(
    headers: &HeaderMap,
    query: &TokenQuery,
    body: Option<&serde_json::Value>,
) -> ApiResult<String> {
    organizer_token(headers, query, body).ok_or_else(|| ShivaError::Unauthorized.into())
}

/// Key for per-client rate limits: the forwarded client address when a proxy
/// supplies one, otherwise the caller's credential.
pub fn client_key(headers: &HeaderMap, fallback: &str) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()));

    match non_empty(forwarded) {
        Some(ip) => format!("ip:{}", ip),
        None => format!("token:{}", fallback),
    }
}
