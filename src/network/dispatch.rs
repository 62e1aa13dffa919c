//! Notification Dispatcher
//!
//! Pushes JSON payloads to viewers through the platform's extension pubsub
//! endpoint, and posts chat messages as the extension.
//!
//! ```text
//!   payload ──► build_scoped_token(identity, channel) ──► POST /extensions/pubsub
//!                      exp = now + 60s, role = external       target: whisper-<id>
//!                                                                     | broadcast
//! ```
//!
//! A broadcast is repeated under every configured extension identity, one
//! after the other with a fixed pause between sends.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::network::auth::{non_empty_env, ExtensionClaims, PubsubPerms};
use crate::network::platform::{outbound_timeout_from_env, DEFAULT_OUTBOUND_TIMEOUT};

/// Lifetime of outbound tokens.
pub const TOKEN_TTL: Duration = Duration::from_secs(60);

/// Pause between consecutive broadcast sends.
pub const BROADCAST_SPACING: Duration = Duration::from_secs(1);

/// Default messaging API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";

/// Default extension version reported with chat messages.
pub const DEFAULT_EXTENSION_VERSION: &str = "0.0.1";

/// Pubsub recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every viewer of the channel.
    Broadcast,
    /// One viewer, by opaque id.
    Whisper(String),
}

impl Target {
    /// Wire form of the target.
    pub fn topic(&self) -> String {
        match self {
            Self::Broadcast => "broadcast".to_string(),
            Self::Whisper(opaque_user_id) => format!("whisper-{opaque_user_id}"),
        }
    }
}

/// Signing identity of one extension.
#[derive(Clone)]
pub struct ExtensionIdentity {
    /// Extension client id.
    pub client_id: String,
    /// Base64 signing secret.
    pub secret: String,
}

impl std::fmt::Debug for ExtensionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionIdentity")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ExtensionIdentity {
    fn from_env(client_var: &str, secret_var: &str) -> Option<Self> {
        Some(Self {
            client_id: non_empty_env(client_var)?,
            secret: non_empty_env(secret_var)?,
        })
    }
}

/// Dispatcher failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No extension identity configured.
    #[error("no extension identity configured")]
    NoIdentity,

    /// No owner id configured for chat tokens.
    #[error("extension owner id not configured")]
    NoOwner,

    /// Outbound token could not be signed.
    #[error("token signing failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport failure or timeout.
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        /// Status returned.
        status: StatusCode,
        /// Response body.
        body: String,
    },
}

/// Sign a short-lived token scoped to `channel_id`.
///
/// The caller supplies the expiry so tests can pin it.
pub fn build_scoped_token(
    secret_b64: &str,
    channel_id: &str,
    user_id: Option<&str>,
    exp: u64,
) -> Result<String, DispatchError> {
    let claims = ExtensionClaims {
        exp,
        opaque_user_id: None,
        user_id: user_id.map(str::to_string),
        channel_id: channel_id.to_string(),
        role: "external".to_string(),
        pubsub_perms: Some(PubsubPerms {
            listen: Vec::new(),
            send: vec!["*".to_string()],
        }),
    };
    let key = EncodingKey::from_base64_secret(secret_b64)?;
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &key)?)
}

/// Expiry for a token issued now.
pub fn expiry_from_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        + TOKEN_TTL.as_secs()
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Messaging API base URL, without trailing slash.
    pub api_base: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Identities in send order. The first one is used for whispers and chat.
    pub identities: Vec<ExtensionIdentity>,
    /// Pause between broadcast sends.
    pub broadcast_spacing: Duration,
    /// `user_id` claim of chat tokens.
    pub owner_id: Option<String>,
    /// Extension version reported with chat messages.
    pub extension_version: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_OUTBOUND_TIMEOUT,
            identities: Vec::new(),
            broadcast_spacing: BROADCAST_SPACING,
            owner_id: None,
            extension_version: DEFAULT_EXTENSION_VERSION.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let identities = [
            ExtensionIdentity::from_env("EXTENSION_CLIENT_ID", "EXTENSION_SECRET"),
            ExtensionIdentity::from_env("BITS_EXTENSION_CLIENT_ID", "BITS_EXTENSION_SECRET"),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            api_base: std::env::var("TWITCH_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            timeout: outbound_timeout_from_env(),
            identities,
            broadcast_spacing: BROADCAST_SPACING,
            owner_id: non_empty_env("EXTENSION_OWNER_ID"),
            extension_version: non_empty_env("EXTENSION_VERSION")
                .unwrap_or_else(|| DEFAULT_EXTENSION_VERSION.to_string()),
        }
    }
}

#[derive(Serialize)]
struct PubsubMessage<'a> {
    target: Vec<String>,
    broadcaster_id: &'a str,
    is_global_broadcast: bool,
    message: String,
}

/// Sends notifications to the platform.
#[derive(Clone)]
pub struct Dispatcher {
    http: Client,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(config: DispatchConfig) -> Result<Self, DispatchError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn primary(&self) -> Result<&ExtensionIdentity, DispatchError> {
        self.config.identities.first().ok_or(DispatchError::NoIdentity)
    }

    /// Deliver `payload` to `targets` under one identity.
    #[instrument(skip(self, identity, payload), fields(client_id = %identity.client_id))]
    pub async fn send_targeted(
        &self,
        identity: &ExtensionIdentity,
        channel_id: &str,
        targets: &[Target],
        payload: &Value,
    ) -> Result<(), DispatchError> {
        let token = build_scoped_token(&identity.secret, channel_id, None, expiry_from_now())?;
        let body = PubsubMessage {
            target: targets.iter().map(Target::topic).collect(),
            broadcaster_id: channel_id,
            is_global_broadcast: false,
            message: serde_json::to_string(payload)?,
        };

        let response = self
            .http
            .post(format!("{}/extensions/pubsub", self.config.api_base))
            .bearer_auth(token)
            .header("Client-Id", &identity.client_id)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        debug!("pubsub message delivered");
        Ok(())
    }

    /// Deliver `payload` to one viewer under the primary identity.
    pub async fn whisper(
        &self,
        channel_id: &str,
        opaque_user_id: &str,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        let identity = self.primary()?;
        self.send_targeted(
            identity,
            channel_id,
            &[Target::Whisper(opaque_user_id.to_string())],
            payload,
        )
        .await
    }

    /// Broadcast `payload` under every identity in order, pausing between sends.
    ///
    /// Stops at the first failing identity.
    #[instrument(skip(self, payload))]
    pub async fn broadcast_all(
        &self,
        channel_id: &str,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        if self.config.identities.is_empty() {
            return Err(DispatchError::NoIdentity);
        }
        for (index, identity) in self.config.identities.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.broadcast_spacing).await;
            }
            self.send_targeted(identity, channel_id, &[Target::Broadcast], payload)
                .await?;
        }
        info!(identities = self.config.identities.len(), "broadcast delivered");
        Ok(())
    }

    /// Post `text` to the channel's chat as the extension.
    #[instrument(skip(self, text))]
    pub async fn send_chat(&self, channel_id: &str, text: &str) -> Result<(), DispatchError> {
        let identity = self.primary()?;
        let owner = self.config.owner_id.as_deref().ok_or(DispatchError::NoOwner)?;
        let token =
            build_scoped_token(&identity.secret, channel_id, Some(owner), expiry_from_now())?;

        let response = self
            .http
            .post(format!("{}/extensions/chat", self.config.api_base))
            .query(&[("broadcaster_id", channel_id)])
            .bearer_auth(token)
            .header("Client-Id", &identity.client_id)
            .json(&json!({
                "text": text,
                "extension_id": identity.client_id,
                "extension_version": self.config.extension_version,
            }))
            .send()
            .await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "platform rejected message");
    Err(DispatchError::FailedWithBody { status, body })
}
