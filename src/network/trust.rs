//! Trust hashes.
//!
//! Privileged callers (the broadcaster's own tooling) prove themselves once
//! with a platform login token and receive a long-lived hash. The hash is
//! stored under `trust/{scope}` and compared on every privileged request.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::hash::{hashes_match, trust_hash};
use crate::network::auth::{non_empty_env, AuthError};
use crate::network::platform::{strip_auth_scheme, PlatformClient, PlatformError};
use crate::store::{self, is_valid_key, Store, StoreError};

/// Stored trust token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustToken {
    /// Lowercase hex hash.
    pub hash: String,
    /// When the login token was validated (Unix ms).
    pub last_validated: i64,
}

/// Response to a successful issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTrust {
    /// The new hash.
    pub hash: String,
    /// When it was validated (Unix ms).
    #[serde(rename = "lastValidated")]
    pub last_validated: i64,
    /// Platform login name.
    pub login: String,
    /// Platform user id, also the trust scope.
    pub user_id: String,
}

/// Trust configuration.
#[derive(Clone, Default)]
pub struct TrustConfig {
    /// Server salt mixed into every hash.
    pub salt: Option<String>,
}

impl std::fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustConfig")
            .field("salt", &self.salt.is_some())
            .finish()
    }
}

impl TrustConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            salt: non_empty_env("TRUST_SALT"),
        }
    }
}

/// Path of a stored trust token.
pub fn trust_path(scope: &str) -> String {
    format!("trust/{scope}")
}

/// Issues and checks trust hashes.
#[derive(Clone)]
pub struct TrustIssuer {
    store: Arc<dyn Store>,
    platform: PlatformClient,
    config: TrustConfig,
}

impl TrustIssuer {
    /// Create an issuer.
    pub fn new(store: Arc<dyn Store>, platform: PlatformClient, config: TrustConfig) -> Self {
        Self {
            store,
            platform,
            config,
        }
    }

    /// Validate a login token with the platform and mint a hash for its user.
    #[instrument(skip_all)]
    pub async fn issue(&self, platform_token: &str) -> Result<IssuedTrust, AuthError> {
        let salt = self.config.salt.as_deref().ok_or(AuthError::NotConfigured)?;
        let token = strip_auth_scheme(platform_token);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let validated = self.platform.validate_oauth(token).await.map_err(|e| match e {
            PlatformError::Rejected => AuthError::PlatformRejected,
            other => {
                warn!(error = %other, "platform validation unavailable");
                AuthError::PlatformUnavailable(other.to_string())
            }
        })?;

        let scope = validated.user_id;
        if !is_valid_key(&scope) {
            return Err(AuthError::PlatformUnavailable(format!(
                "unusable user id {scope:?}"
            )));
        }

        let record = TrustToken {
            hash: trust_hash(&scope, token, salt),
            last_validated: Utc::now().timestamp_millis(),
        };
        let path = trust_path(&scope);
        self.store.set(&path, store::encode(&path, &record)?).await?;
        info!(scope = %scope, "trust hash issued");

        Ok(IssuedTrust {
            hash: record.hash,
            last_validated: record.last_validated,
            login: validated.login,
            user_id: scope,
        })
    }

    /// Whether `provided` matches the hash stored for `scope`.
    pub async fn verify(&self, scope: &str, provided: &str) -> Result<bool, StoreError> {
        let stored: Option<TrustToken> =
            store::read(self.store.as_ref(), &trust_path(scope)).await?;
        Ok(stored.is_some_and(|token| hashes_match(&token.hash, provided)))
    }

    /// Like [`verify`](Self::verify), failing with `HashMismatch`.
    pub async fn require(&self, scope: &str, provided: Option<&str>) -> Result<(), AuthError> {
        let provided = provided
            .map(strip_auth_scheme)
            .filter(|h| !h.is_empty())
            .ok_or(AuthError::MissingToken)?;
        if self.verify(scope, provided).await? {
            Ok(())
        } else {
            Err(AuthError::HashMismatch)
        }
    }
}
