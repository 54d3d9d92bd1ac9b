use super::config::{GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET, GOOGLE_REFRESH_TOKEN, OAUTH_TOKEN_URL};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Tokens are treated as expired this long before Google says they are.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum DriveAuthError {
    #[error("missing google oauth credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl OAuthCredentials {
    pub fn from_env() -> Option<Self> {
        if GOOGLE_CLIENT_ID.is_empty()
            || GOOGLE_CLIENT_SECRET.is_empty()
            || GOOGLE_REFRESH_TOKEN.is_empty()
        {
            return None;
        }
        Some(Self {
            client_id: GOOGLE_CLIENT_ID.clone(),
            client_secret: GOOGLE_CLIENT_SECRET.clone(),
            refresh_token: GOOGLE_REFRESH_TOKEN.clone(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Access-token cache over the OAuth refresh-token grant.
pub struct DriveAuth {
    credentials: Option<OAuthCredentials>,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl DriveAuth {
    pub fn new(credentials: Option<OAuthCredentials>, http: Client) -> Self {
        Self {
            credentials,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Returns a usable access token, refreshing it when it is close to
    /// expiry or when `force` is set.
    pub async fn access_token(&self, force: bool) -> Result<String, DriveAuthError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(DriveAuthError::MissingCredentials)?;

        let mut cached = self.cached.lock().await;
        if !force
            && let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now())
        {
            return Ok(token.access_token.clone());
        }

        let fresh = request_token(&self.http, credentials).await?;
        info!(target = "labelhub.drive", forced = force, expires_at = %fresh.expires_at, "access_token_refreshed");
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }
}

async fn request_token(
    http: &Client,
    credentials: &OAuthCredentials,
) -> Result<CachedToken, DriveAuthError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("refresh_token", credentials.refresh_token.as_str()),
    ];
    let response = http
        .post(OAUTH_TOKEN_URL.as_str())
        .form(&params)
        .send()
        .await
        .map_err(|err| DriveAuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(DriveAuthError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| DriveAuthError::Request(err.to_string()))?;
    Ok(CachedToken {
        access_token: payload.access_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}
