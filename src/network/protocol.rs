//! Protocol Messages
//!
//! Query and body schemas of the HTTP surface, plus the notification
//! envelopes pushed to viewers. Everything is JSON with camelCase keys.
//! Bodies are decoded here so every malformed request fails the same way
//! before any store access.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::ledger::BalanceUpdate;
use crate::game::launch::LaunchSelection;
use crate::game::reward::{BitsCost, BitsPurchase};
use crate::store::is_valid_key;

/// Request shape failures. All map to 400.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required query parameter is absent or empty.
    #[error("missing query parameter {0}")]
    MissingParam(&'static str),

    /// A parameter cannot be used as a store key.
    #[error("invalid {param}: {value:?}")]
    InvalidKey {
        /// Parameter or field name.
        param: &'static str,
        /// Offending value.
        value: String,
    },

    /// The body is not valid JSON of the expected shape.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// A body field has an unacceptable value.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Decode a JSON body.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(body).map_err(|e| ProtocolError::InvalidBody(e.to_string()))
}

/// Decode a JSON body, treating an empty body as the default value.
pub fn parse_body_or_default<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, ProtocolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn store_key(param: &'static str, value: &str) -> Result<String, ProtocolError> {
    if is_valid_key(value) {
        Ok(value.to_string())
    } else {
        Err(ProtocolError::InvalidKey {
            param,
            value: value.to_string(),
        })
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// Query string shared by every endpoint. Each handler requires its subset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestQuery {
    /// Channel the request concerns.
    pub channel_id: Option<String>,
    /// Player the request concerns.
    pub player_id: Option<String>,
    /// Viewer's opaque id.
    pub opaque_user_id: Option<String>,
    /// Store item to buy.
    pub store_item_id: Option<String>,
}

impl RequestQuery {
    fn required(value: &Option<String>, param: &'static str) -> Result<String, ProtocolError> {
        let value = value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(ProtocolError::MissingParam(param))?;
        store_key(param, value)
    }

    /// `channelId`, validated as a store key.
    pub fn channel(&self) -> Result<String, ProtocolError> {
        Self::required(&self.channel_id, "channelId")
    }

    /// `playerId`, validated as a store key.
    pub fn player(&self) -> Result<String, ProtocolError> {
        Self::required(&self.player_id, "playerId")
    }

    /// `opaqueUserId`.
    pub fn opaque_user(&self) -> Result<String, ProtocolError> {
        Self::required(&self.opaque_user_id, "opaqueUserId")
    }

    /// `storeItemId`, validated as a store key.
    pub fn store_item(&self) -> Result<String, ProtocolError> {
        Self::required(&self.store_item_id, "storeItemId")
    }
}

// =============================================================================
// REQUEST BODIES
// =============================================================================

/// Body of `/deleteLaunches`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteLaunchesRequest {
    /// Clear the whole queue.
    #[serde(rename = "deleteAll", default)]
    pub delete_all: Option<bool>,
    /// Keys to delete.
    #[serde(default)]
    pub launchids: Option<Vec<String>>,
}

impl DeleteLaunchesRequest {
    /// Resolve to a selection. Needs `deleteAll: true` or a key list.
    pub fn into_selection(self) -> Result<LaunchSelection, ProtocolError> {
        if self.delete_all == Some(true) {
            return Ok(LaunchSelection::All);
        }
        let ids = self.launchids.ok_or_else(|| {
            ProtocolError::InvalidBody("expected deleteAll or launchids".to_string())
        })?;
        let keys = ids
            .iter()
            .map(|id| store_key("launchids", id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LaunchSelection::Keys(keys))
    }
}

fn balance_field(
    player_id: &str,
    field: &str,
    value: Option<&Value>,
) -> Result<Option<i64>, ProtocolError> {
    let invalid = || ProtocolError::InvalidField {
        field: format!("{player_id}.{field}"),
        reason: "must be an integer".to_string(),
    };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => Ok(Some(v)),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

/// Decode the `/updateUsers` body: a map of player id to balances.
///
/// Non-numeric balances are rejected here; sign checks happen in the ledger.
pub fn parse_user_updates(body: &[u8]) -> Result<BTreeMap<String, BalanceUpdate>, ProtocolError> {
    let raw: BTreeMap<String, Value> = parse_body(body)?;
    let mut updates = BTreeMap::new();
    for (player_id, entry) in raw {
        let player_id = store_key("playerId", &player_id)?;
        let Value::Object(fields) = entry else {
            return Err(ProtocolError::InvalidField {
                field: player_id,
                reason: "must be an object".to_string(),
            });
        };
        let update = BalanceUpdate {
            points: balance_field(&player_id, "points", fields.get("points"))?,
            puck_count: balance_field(&player_id, "puckCount", fields.get("puckCount"))?,
        };
        updates.insert(player_id, update);
    }
    Ok(updates)
}

/// Product part of `/logTransaction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    /// Product SKU.
    pub sku: String,
    /// Product display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Price.
    #[serde(default)]
    pub cost: Option<BitsCost>,
}

/// Body of `/logTransaction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTransactionRequest {
    /// Platform transaction id.
    pub transaction_id: String,
    /// Product bought.
    pub product: ProductInfo,
    /// Buyer's display name.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl LogTransactionRequest {
    /// Convert into a domain purchase.
    pub fn into_purchase(self) -> Result<BitsPurchase, ProtocolError> {
        if self.transaction_id.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "transactionId".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.product.sku.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "product.sku".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(BitsPurchase {
            transaction_id: self.transaction_id,
            sku: self.product.sku,
            cost: self.product.cost.unwrap_or_default(),
            display_name: self.display_name,
        })
    }
}

/// Body of `/levelStarted`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStartedRequest {
    /// Level identifier.
    #[serde(default)]
    pub level: Value,
    /// Player who started it.
    #[serde(default)]
    pub player_id: Option<String>,
}

impl LevelStartedRequest {
    /// Check the level is present.
    pub fn validate(self) -> Result<Self, ProtocolError> {
        if self.level.is_null() {
            return Err(ProtocolError::InvalidField {
                field: "level".to_string(),
                reason: "is required".to_string(),
            });
        }
        Ok(self)
    }
}

/// Body of `/unlockTwitchConTrail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnlockRequest {
    /// Unlock (true) or re-lock (false).
    #[serde(default = "default_unlocked")]
    pub unlocked: bool,
}

fn default_unlocked() -> bool {
    true
}

impl Default for UnlockRequest {
    fn default() -> Self {
        Self { unlocked: true }
    }
}

// =============================================================================
// RESPONSES AND NOTIFICATIONS
// =============================================================================

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always true.
    pub ok: bool,
}

/// Response of `/levelStarted`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStartedResponse {
    /// Channel counter after the increment.
    pub level_start_count: u64,
}

/// Response of `/unlockTwitchConTrail`.
#[derive(Debug, Clone, Serialize)]
pub struct UnlockResponse {
    /// Resulting state.
    pub unlocked: bool,
}

/// Payloads pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// A player's state after a purchase.
    #[serde(rename_all = "camelCase")]
    PlayerState {
        /// Point balance.
        points: u64,
        /// Puck balance.
        puck_count: u64,
        /// Owned items.
        items_purchased: Vec<String>,
    },

    /// Balances were overridden by the broadcaster.
    UsersUpdated {
        /// The applied updates.
        users: BTreeMap<String, BalanceUpdate>,
    },
}

impl Notification {
    /// JSON form of the notification.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
