//! Platform OAuth validation.
//!
//! Used once per trust-hash issue: the caller's login token is checked
//! against the platform's identity service before a hash is minted.

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default identity service base URL.
pub const DEFAULT_ID_BASE: &str = "https://id.twitch.tv/oauth2";

/// Default timeout for outbound calls.
pub const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Read `OUTBOUND_TIMEOUT_MS`, falling back to the default.
pub fn outbound_timeout_from_env() -> Duration {
    std::env::var("OUTBOUND_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_OUTBOUND_TIMEOUT)
}

/// Identity service configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Identity service base URL, without trailing slash.
    pub id_base: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            id_base: DEFAULT_ID_BASE.to_string(),
            timeout: DEFAULT_OUTBOUND_TIMEOUT,
        }
    }
}

impl PlatformConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            id_base: std::env::var("TWITCH_ID_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_ID_BASE.to_string()),
            timeout: outbound_timeout_from_env(),
        }
    }
}

/// Platform call failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The token was refused.
    #[error("login token rejected")]
    Rejected,

    /// Transport failure or timeout.
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Unexpected status.
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        /// Status returned.
        status: StatusCode,
        /// Response body.
        body: String,
    },
}

/// Identity behind a validated login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedToken {
    /// Application the token was issued to.
    #[serde(default)]
    pub client_id: String,
    /// Login name.
    #[serde(default)]
    pub login: String,
    /// Platform user id.
    pub user_id: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Seconds until expiry.
    #[serde(default)]
    pub expires_in: u64,
}

/// Strip an `OAuth ` or `Bearer ` scheme, leaving the raw token.
pub fn strip_auth_scheme(value: &str) -> &str {
    let value = value.trim();
    for scheme in ["OAuth ", "Bearer ", "oauth ", "bearer "] {
        if let Some(rest) = value.strip_prefix(scheme) {
            return rest.trim();
        }
    }
    value
}

/// Client for the platform identity service.
#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    config: PlatformConfig,
}

impl PlatformClient {
    /// Create a client.
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// Validate a login token.
    #[instrument(skip_all)]
    pub async fn validate_oauth(&self, token: &str) -> Result<ValidatedToken, PlatformError> {
        let response = self
            .http
            .get(format!("{}/validate", self.config.id_base))
            .header(header::AUTHORIZATION, format!("OAuth {}", strip_auth_scheme(token)))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!("login token rejected");
            return Err(PlatformError::Rejected);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token validation failed");
            return Err(PlatformError::FailedWithBody { status, body });
        }
        Ok(response.json::<ValidatedToken>().await?)
    }
}
