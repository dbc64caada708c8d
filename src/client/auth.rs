//! Client-credentials token management.
//!
//! Tokens are cached until shortly before expiry and refreshed on demand.
//! The engine client also forces a refresh once on an unexpected 401, which
//! covers server-side revocation.

use crate::config::OAuthConfig;
use crate::error::{Result, WorkerError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

/// Refresh this long before the engine would consider the token expired.
const REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    1800
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Fetches and caches OAuth access tokens for the engine.
pub struct TokenProvider {
    http: reqwest::Client,
    config: OAuthConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self {
            http,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Current access token, fetching a fresh one if the cache is empty or
    /// inside the refresh margin.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }
        self.fetch_token().await
    }

    /// Drop the cached token so the next call fetches a fresh one.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.lock();
        let token = cached.as_ref()?;
        let margin = ChronoDuration::seconds(REFRESH_MARGIN_SECS);
        if token.expires_at - margin > Utc::now() {
            Some(token.access_token.clone())
        } else {
            None
        }
    }

    async fn fetch_token(&self) -> Result<String> {
        debug!(
            auth_server_url = %self.config.auth_server_url,
            audience = %self.config.audience,
            "Requesting access token"
        );

        let form = vec![
            ("grant_type", "client_credentials"),
            ("audience", self.config.audience.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.auth_server_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                WorkerError::TransientNetwork(format!("Token request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token request rejected");
            if status.is_server_error() {
                return Err(WorkerError::TransientNetwork(format!(
                    "Authorization server error {status}: {error_text}"
                )));
            }
            return Err(WorkerError::AuthenticationFailed(format!(
                "Token request rejected ({status}): {error_text}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            WorkerError::AuthenticationFailed(format!("Invalid token response: {e}"))
        })?;

        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in as i64);
        debug!(expires_at = %expires_at, "Access token acquired");

        *self.cached.lock() = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}
