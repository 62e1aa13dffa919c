//! Store catalog.
//!
//! Items are global. An item may be exclusive to one channel. The
//! privileged unlock operation never moves that gate; it records per-channel
//! exceptions under `unlockedFor/{channelId}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::store::{self, Store, StoreError};

/// Item unlocked by the TwitchCon unlock endpoint.
pub const TWITCHCON_TRAIL_ITEM: &str = "twitchConTrail";

/// A purchasable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreItem {
    /// Price in points. Zero marks an incomplete record.
    #[serde(default)]
    pub cost: u64,
    /// Channel the item is restricted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_to: Option<String>,
    /// Channels unlocked past the exclusivity gate, stored as `channelId -> true`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unlocked_for: BTreeMap<String, bool>,
}

impl StoreItem {
    /// An item sold everywhere.
    pub fn priced(cost: u64) -> Self {
        Self {
            cost,
            exclusive_to: None,
            unlocked_for: BTreeMap::new(),
        }
    }

    /// Whether `channel_id` holds an unlock for this item.
    pub fn unlocked_in(&self, channel_id: &str) -> bool {
        self.unlocked_for.get(channel_id).copied().unwrap_or(false)
    }

    /// Whether the item can be bought in `channel_id`.
    pub fn available_in(&self, channel_id: &str) -> bool {
        if self.cost == 0 {
            return false;
        }
        match self.exclusive_to.as_deref() {
            None => true,
            Some(exclusive) => exclusive == channel_id || self.unlocked_in(channel_id),
        }
    }
}

fn item_path(item_id: &str) -> String {
    format!("storeItems/{item_id}")
}

/// Read access to the catalog plus the unlock toggle.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
}

impl Catalog {
    /// Create a catalog over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Look up an item.
    pub async fn get(&self, item_id: &str) -> Result<Option<StoreItem>, StoreError> {
        store::read(self.store.as_ref(), &item_path(item_id)).await
    }

    /// Open `item_id` to `channel_id`, or close it again.
    ///
    /// Only the channel's own flag is touched. Other channels' unlocks and
    /// the `exclusiveTo` gate stay as they are.
    pub async fn set_unlocked(
        &self,
        item_id: &str,
        channel_id: &str,
        unlocked: bool,
    ) -> Result<(), StoreError> {
        let value = if unlocked { json!(true) } else { Value::Null };
        self.store
            .set(&format!("{}/unlockedFor/{channel_id}", item_path(item_id)), value)
            .await?;
        info!(item_id, channel_id, unlocked, "item unlock changed");
        Ok(())
    }
}
