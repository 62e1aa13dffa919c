//! Bits rewards.
//!
//! A completed bits purchase maps its SKU to a puck grant. The grant is queued
//! for the game client as an [`Upgrade`] and the purchase itself is kept as an
//! audit [`TransactionRecord`]. Both land in one multi-path write, so an upgrade
//! never exists without the transaction it came from.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::ids::push_id;
use crate::store::{self, Store, StoreError};

/// Upgrade target meaning every player in the channel.
pub const TARGET_ALL: &str = "all";

/// Who receives a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardTarget {
    /// The purchasing player.
    Purchaser,
    /// Every player in the channel.
    Everyone,
}

/// Pucks granted by a SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardGrant {
    /// Pucks per recipient.
    pub pucks: u64,
    /// Recipients.
    pub target: RewardTarget,
}

/// Reward failures.
#[derive(Debug, Error)]
pub enum RewardError {
    /// The SKU has no effect defined. Nothing is recorded.
    #[error("unknown sku: {0}")]
    UnknownSku(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Map a SKU to its grant.
pub fn reward_for_sku(sku: &str) -> Result<RewardGrant, RewardError> {
    let (pucks, target) = match sku {
        "get-100" => (100, RewardTarget::Purchaser),
        "give-10-to-everyone" => (10, RewardTarget::Everyone),
        "give-100-to-everyone" => (100, RewardTarget::Everyone),
        other => return Err(RewardError::UnknownSku(other.to_string())),
    };
    Ok(RewardGrant { pucks, target })
}

/// Bits price of a product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitsCost {
    /// Amount in `kind` units.
    #[serde(default)]
    pub amount: u64,
    /// Currency, normally `"bits"`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A completed bits purchase as reported by the extension frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitsPurchase {
    /// Platform transaction id.
    pub transaction_id: String,
    /// Product SKU.
    pub sku: String,
    /// Price paid.
    pub cost: BitsCost,
    /// Buyer's display name, if shared.
    pub display_name: Option<String>,
}

/// Audit record of a bits purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Platform transaction id.
    pub transaction_id: String,
    /// Product SKU.
    pub sku: String,
    /// Price paid.
    pub cost: BitsCost,
    /// Buyer's display name.
    pub display_name: String,
    /// When it was recorded.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

/// Game-state effect queued for the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    /// Pucks per recipient.
    pub puck_count: u64,
    /// Purchasing player.
    pub source: String,
    /// Receiving player, or [`TARGET_ALL`].
    pub target: String,
    /// Human-readable summary, also used for the chat acknowledgment.
    pub message: String,
    /// Key of the transaction record this upgrade came from.
    pub transaction_key: String,
}

impl RewardGrant {
    /// Build the upgrade for a purchase by `player_id`.
    pub fn upgrade(&self, player_id: &str, display_name: &str, transaction_key: String) -> Upgrade {
        let (target, message) = match self.target {
            RewardTarget::Purchaser => (
                player_id.to_string(),
                format!("{display_name} got {} pucks!", self.pucks),
            ),
            RewardTarget::Everyone => (
                TARGET_ALL.to_string(),
                format!("{display_name} gave {} pucks to everyone!", self.pucks),
            ),
        };
        Upgrade {
            puck_count: self.pucks,
            source: player_id.to_string(),
            target,
            message,
            transaction_key,
        }
    }
}

/// Path of a channel's upgrade queue.
pub fn upgrades_path(channel_id: &str) -> String {
    format!("channels/{channel_id}/upgrades")
}

/// Path of a player's transaction log.
pub fn transactions_path(channel_id: &str, player_id: &str) -> String {
    format!("channels/{channel_id}/transactions/{player_id}")
}

/// Applies bits purchases.
#[derive(Clone)]
pub struct RewardEngine {
    store: Arc<dyn Store>,
}

impl RewardEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Derive and persist the effect of a bits purchase.
    #[instrument(skip(self, purchase), fields(sku = %purchase.sku))]
    pub async fn apply(
        &self,
        channel_id: &str,
        player_id: &str,
        purchase: &BitsPurchase,
    ) -> Result<Upgrade, RewardError> {
        let grant = reward_for_sku(&purchase.sku)?;

        let display_name = purchase
            .display_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| player_id.to_string());
        let transaction_key = push_id();
        let upgrade = grant.upgrade(player_id, &display_name, transaction_key.clone());
        let record = TransactionRecord {
            transaction_id: purchase.transaction_id.clone(),
            sku: purchase.sku.clone(),
            cost: purchase.cost.clone(),
            display_name,
            time: Utc::now(),
        };

        let upgrade_path = format!("{}/{}", upgrades_path(channel_id), push_id());
        let record_path = format!(
            "{}/{}",
            transactions_path(channel_id, player_id),
            transaction_key
        );
        let mut updates = BTreeMap::new();
        updates.insert(upgrade_path.clone(), store::encode(&upgrade_path, &upgrade)?);
        updates.insert(record_path.clone(), store::encode(&record_path, &record)?);
        self.store.update(updates).await?;

        info!(pucks = grant.pucks, target = %upgrade.target, "reward recorded");
        Ok(upgrade)
    }
}
