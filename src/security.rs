use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

const FALLBACK_KEYS: &str = "demo-owner:demo-key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, KeyRecord>>,
}

/// Identity attached to every authenticated request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub owner_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct KeyRecord {
    owner_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("API_KEYS").unwrap_or_else(|_| FALLBACK_KEYS.to_string());
        Self::from_keys(&raw)
    }

    /// Parses `owner:key` pairs separated by commas.
    pub fn from_keys(raw: &str) -> Self {
        Self {
            records: Arc::new(parse_keys(raw)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            owner_id: record.owner_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Api-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Api-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::new(code, message))).into_response()
}

fn parse_keys(raw: &str) -> HashMap<String, KeyRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(':') {
            Some((owner, secret)) if !owner.trim().is_empty() && !secret.trim().is_empty() => {
                entries.insert(
                    secret.trim().to_string(),
                    KeyRecord {
                        owner_id: owner.trim().to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(target = "labelhub.api", "ignored malformed API_KEYS entry at position {}", idx + 1),
        }
    }

    if entries.is_empty() {
        warn!(target = "labelhub.api", "API_KEYS produced no keys; falling back to demo credentials");
        if raw != FALLBACK_KEYS {
            return parse_keys(FALLBACK_KEYS);
        }
    } else {
        info!(target = "labelhub.api", key_count = entries.len(), "loaded API keys");
    }
    entries
}
