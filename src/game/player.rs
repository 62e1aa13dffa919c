//! Player records.
//!
//! One record per (channel, player). Created on first sighting with the
//! default balances and then only mutated in place. The game client shares
//! the record, so fields this server does not model are carried through.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pucks granted to a player on first sighting.
pub const DEFAULT_PUCK_COUNT: u64 = 100;

/// Points granted to a player on first sighting.
pub const DEFAULT_POINTS: u64 = 0;

fn default_puck_count() -> u64 {
    DEFAULT_PUCK_COUNT
}

/// Persisted player state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Store currency.
    #[serde(default)]
    pub points: u64,
    /// Gameplay resource.
    #[serde(default = "default_puck_count")]
    pub puck_count: u64,
    /// Platform-issued opaque id, used to address whispers.
    #[serde(default)]
    pub opaque_user_id: String,
    /// Last arrival (ms since epoch in the store).
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen: Option<DateTime<Utc>>,
    /// Owned store items, stored as `itemId -> true`.
    #[serde(default)]
    pub items_purchased: BTreeMap<String, bool>,
    /// Fields owned by other writers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Player {
    /// A freshly sighted player.
    pub fn new(opaque_user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            points: DEFAULT_POINTS,
            puck_count: DEFAULT_PUCK_COUNT,
            opaque_user_id: opaque_user_id.to_string(),
            last_seen: Some(now),
            items_purchased: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Whether the player already owns `item_id`.
    pub fn owns(&self, item_id: &str) -> bool {
        self.items_purchased.get(item_id).copied().unwrap_or(false)
    }

    /// Owned item ids in key order.
    pub fn owned_items(&self) -> Vec<String> {
        self.items_purchased
            .iter()
            .filter(|(_, owned)| **owned)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Balances as returned to the extension frontend.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            puck_count: self.puck_count,
            points: self.points,
        }
    }
}

/// Public balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Gameplay resource.
    pub puck_count: u64,
    /// Store currency.
    pub points: u64,
}
