//! Extension Token Authentication
//!
//! Validates the short-lived JWTs the platform issues to the extension
//! frontend. Tokens are HS256-signed with a base64-encoded shared secret.
//! Two secrets may be configured so the secret can be rotated without
//! downtime: the primary is tried first, then the secondary.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication configuration.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Primary base64 signing secret.
    pub primary_secret: Option<String>,
    /// Secondary base64 signing secret, accepted during rotation.
    pub secondary_secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("primary_secret", &self.primary_secret.is_some())
            .field("secondary_secret", &self.secondary_secret.is_some())
            .field("skip_expiry", &self.skip_expiry)
            .finish()
    }
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            primary_secret: non_empty_env("EXTENSION_SECRET"),
            secondary_secret: non_empty_env("EXTENSION_SECRET_SECONDARY"),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.primary_secret.is_some()
    }
}

pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Publish/listen grants carried by extension tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubsubPerms {
    /// Topics the bearer may listen on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
    /// Targets the bearer may send to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub send: Vec<String>,
}

/// Claims of a platform-issued extension token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionClaims {
    /// Expiry timestamp (Unix seconds).
    pub exp: u64,
    /// Per-viewer opaque id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque_user_id: Option<String>,
    /// Platform user id, present when the viewer shared their identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Channel the extension runs on.
    pub channel_id: String,
    /// `broadcaster`, `moderator`, `viewer` or `external`.
    #[serde(default)]
    pub role: String,
    /// Pubsub grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_perms: Option<PubsubPerms>,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("missing token")]
    MissingToken,

    /// No signing secret configured on server.
    #[error("authentication not configured")]
    NotConfigured,

    /// A configured secret is not valid base64.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// Token failed verification under every configured secret.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token is valid but scoped to a different channel.
    #[error("token is not scoped to channel {0}")]
    WrongChannel(String),

    /// Trust hash missing or not matching.
    #[error("trust hash mismatch")]
    HashMismatch,

    /// The platform rejected the login token.
    #[error("platform rejected the login token")]
    PlatformRejected,

    /// The platform could not be reached or answered unexpectedly.
    #[error("platform validation unavailable: {0}")]
    PlatformUnavailable(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Whether the failure is the server's fault rather than the caller's.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured
                | Self::InvalidKey(_)
                | Self::PlatformUnavailable(_)
                | Self::Store(_)
        )
    }
}

/// Validate an extension token against the configured secrets.
///
/// Fails with `MissingToken` if absent and `NotConfigured` without a primary
/// secret; `InvalidToken` only after every configured secret rejected it.
pub fn verify_extension_token(
    token: Option<&str>,
    config: &AuthConfig,
) -> Result<ExtensionClaims, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let primary = config
        .primary_secret
        .as_deref()
        .ok_or(AuthError::NotConfigured)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = ["exp"].into_iter().map(String::from).collect();
    validation.validate_aud = false;
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    match decode_with(token, primary, &validation) {
        Ok(claims) => Ok(claims),
        Err(AuthError::InvalidToken(reason)) => match config.secondary_secret.as_deref() {
            Some(secondary) => decode_with(token, secondary, &validation),
            None => Err(AuthError::InvalidToken(reason)),
        },
        Err(e) => Err(e),
    }
}

fn decode_with(
    token: &str,
    secret: &str,
    validation: &Validation,
) -> Result<ExtensionClaims, AuthError> {
    let key = DecodingKey::from_base64_secret(secret)
        .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
    decode::<ExtensionClaims>(token, &key, validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Check that verified claims belong to `channel_id`.
pub fn require_channel(claims: &ExtensionClaims, channel_id: &str) -> Result<(), AuthError> {
    if claims.channel_id == channel_id {
        Ok(())
    } else {
        Err(AuthError::WrongChannel(channel_id.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
