//! Caller identity. Token verification itself is an external collaborator;
//! the engine only consumes the decoded `{id, role}` pair, obtained through
//! the [`IdentityDecoder`] capability.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

/// Decoded caller identity attached by the auth middleware.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Turns an opaque bearer token (or `_auth` cookie value) into a caller.
pub trait IdentityDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Option<Caller>;
}

/// Static token table. Stands in for the external identity provider in the
/// bundled binary and in tests; a real deployment plugs its own decoder in.
#[derive(Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Caller>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, caller: Caller) {
        self.tokens.insert(token.into(), caller);
    }

    /// Load a `{token: {"id": .., "role": ..}}` JSON file. A missing file
    /// yields an empty table (every request is anonymous).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Ok(Self::new()),
        };
        let tokens: HashMap<String, Caller> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse {}: {}", path.display(), e)))?;
        Ok(Self { tokens })
    }
}

impl IdentityDecoder for StaticTokens {
    fn decode(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token).copied()
    }
}

/// Request extension holding the decoded caller, if any.
#[derive(Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl MaybeCaller {
    pub fn id(&self) -> Option<i64> {
        self.0.map(|c| c.id)
    }
}

/// Decode the caller (bearer header first, `_auth` cookie as fallback) and
/// attach it as an extension. Anonymous requests pass through with `None`.
pub async fn attach_caller(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = bearer_token(req.headers()).or_else(|| cookie_token(req.headers()));
    let caller = token.and_then(|t| state.identity.decode(&t));
    req.extensions_mut().insert(MaybeCaller(caller));
    next.run(req).await
}

/// Every API route sits behind the configured key.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if key.is_empty() || key != state.config.get().api_key {
        return Err(AppError::Forbidden("invalid api key".into()));
    }
    Ok(next.run(req).await)
}

pub fn require_admin(caller: &MaybeCaller) -> Result<Caller, AppError> {
    match caller.0 {
        Some(c) if c.is_admin() => Ok(c),
        _ => Err(AppError::Forbidden("admin access required".into())),
    }
}

fn bearer_token(headers: &header::HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn cookie_token(headers: &header::HeaderMap) -> Option<String> {
    let value = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let pair = pair.trim();
        if let Some(token) = pair.strip_prefix("_auth=") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_takes_priority_over_cookie() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer tok-1"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; _auth=tok-2"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-1"));
        assert_eq!(cookie_token(&headers).as_deref(), Some("tok-2"));
    }

    #[test]
    fn static_tokens_decode() {
        let mut tokens = StaticTokens::new();
        tokens.insert(
            "admin-token",
            Caller {
                id: 1,
                role: Role::Admin,
            },
        );
        let caller = tokens.decode("admin-token").unwrap();
        assert!(caller.is_admin());
        assert!(tokens.decode("other").is_none());
    }

    #[test]
    fn require_admin_rejects_non_admins() {
        assert!(require_admin(&MaybeCaller(None)).is_err());
        let user = MaybeCaller(Some(Caller {
            id: 7,
            role: Role::User,
        }));
        assert!(require_admin(&user).is_err());
    }
}
