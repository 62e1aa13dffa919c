//! Player Ledger
//!
//! Owns per-channel, per-player balances in the external store:
//! - `get_or_init`: arrival, creates the record once and refreshes `lastSeen`
//! - `apply_delta` / `apply_deltas`: privileged balance overrides
//! - `record_purchase`: debit plus ownership as one conditional write
//!
//! Every operation re-reads the store. Nothing is cached between requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::game::player::{Player, PlayerView};
use crate::store::{self, Store, StoreError, Versioned};

/// Balance fields a privileged caller may set.
///
/// Absent fields leave the stored balance untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    /// New point balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    /// New puck balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puck_count: Option<i64>,
}

impl BalanceUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.points.is_none() && self.puck_count.is_none()
    }
}

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A provided balance is not acceptable.
    #[error("invalid {field} for player {player}: {reason}")]
    Validation {
        /// Player the update targeted.
        player: String,
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The player has no record in this channel.
    #[error("player {0} has no record in this channel")]
    UnknownPlayer(String),

    /// The record changed between read and conditional write.
    #[error("player record changed concurrently")]
    Conflict,

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Path of a player record.
pub fn player_path(channel_id: &str, player_id: &str) -> String {
    format!("channels/{channel_id}/players/{player_id}")
}

/// Path of all player records of a channel.
pub fn players_path(channel_id: &str) -> String {
    format!("channels/{channel_id}/players")
}

/// The player ledger.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    /// Create a ledger over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register an arrival.
    ///
    /// Creates the record with default balances on first sighting. On repeat
    /// calls only `lastSeen` and the opaque id change. Runs as a
    /// compare-and-swap so concurrent first arrivals cannot clobber a
    /// record another request just created.
    #[instrument(skip(self))]
    pub async fn get_or_init(
        &self,
        channel_id: &str,
        player_id: &str,
        opaque_user_id: &str,
    ) -> Result<PlayerView, LedgerError> {
        let path = player_path(channel_id, player_id);
        let now = Utc::now();
        let mut decode_failure = None;

        let committed = store::transaction(self.store.as_ref(), &path, |current| {
            let player = match current {
                None => Player::new(opaque_user_id, now),
                Some(value) => match serde_json::from_value::<Player>(value.clone()) {
                    Ok(mut player) => {
                        player.last_seen = Some(now);
                        player.opaque_user_id = opaque_user_id.to_string();
                        player
                    }
                    Err(e) => {
                        decode_failure = Some(e.to_string());
                        return None;
                    }
                },
            };
            serde_json::to_value(&player).ok()
        })
        .await?;

        let Some(value) = committed else {
            return Err(StoreError::Malformed {
                path,
                reason: decode_failure.unwrap_or_else(|| "unencodable record".to_string()),
            }
            .into());
        };
        let player: Player = store::decode(&path, value)?;
        debug!(points = player.points, pucks = player.puck_count, "player arrived");
        Ok(player.view())
    }

    /// Read a player record.
    pub async fn get(
        &self,
        channel_id: &str,
        player_id: &str,
    ) -> Result<Option<Player>, LedgerError> {
        Ok(store::read(self.store.as_ref(), &player_path(channel_id, player_id)).await?)
    }

    /// Read a player record with its version tag.
    pub async fn get_versioned(
        &self,
        channel_id: &str,
        player_id: &str,
    ) -> Result<Versioned<Player>, LedgerError> {
        Ok(store::read_versioned(self.store.as_ref(), &player_path(channel_id, player_id)).await?)
    }

    /// Set the provided balances of one player.
    pub async fn apply_delta(
        &self,
        channel_id: &str,
        player_id: &str,
        update: &BalanceUpdate,
    ) -> Result<(), LedgerError> {
        let mut updates = BTreeMap::new();
        updates.insert(player_id.to_string(), *update);
        self.apply_deltas(channel_id, &updates).await
    }

    /// Set the provided balances of several players as one atomic write.
    ///
    /// Every entry is validated before anything is written.
    #[instrument(skip(self, updates), fields(players = updates.len()))]
    pub async fn apply_deltas(
        &self,
        channel_id: &str,
        updates: &BTreeMap<String, BalanceUpdate>,
    ) -> Result<(), LedgerError> {
        let mut writes = BTreeMap::new();
        for (player_id, update) in updates {
            let base = player_path(channel_id, player_id);
            if let Some(points) = update.points {
                let points = non_negative(player_id, "points", points)?;
                writes.insert(format!("{base}/points"), json!(points));
            }
            if let Some(pucks) = update.puck_count {
                let pucks = non_negative(player_id, "puckCount", pucks)?;
                writes.insert(format!("{base}/puckCount"), json!(pucks));
            }
        }

        if writes.is_empty() {
            return Ok(());
        }
        self.store.update(writes).await?;
        info!(channel_id, "balances updated");
        Ok(())
    }

    /// Commit a purchase against the snapshot the checks ran on.
    ///
    /// Writes the new point balance and adds the item in a single write
    /// guarded by the snapshot's tag. Returns [`LedgerError::Conflict`] if
    /// the record changed since the snapshot was taken.
    pub async fn record_purchase(
        &self,
        channel_id: &str,
        player_id: &str,
        snapshot: &Versioned<Player>,
        item_id: &str,
        new_points: u64,
    ) -> Result<Player, LedgerError> {
        let path = player_path(channel_id, player_id);
        let mut next = snapshot
            .value
            .clone()
            .ok_or_else(|| LedgerError::UnknownPlayer(player_id.to_string()))?;
        next.points = new_points;
        next.items_purchased.insert(item_id.to_string(), true);

        let value = store::encode(&path, &next)?;
        if !self.store.set_if(&path, value, &snapshot.etag).await? {
            return Err(LedgerError::Conflict);
        }
        Ok(next)
    }
}

fn non_negative(player_id: &str, field: &'static str, value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Validation {
        player: player_id.to_string(),
        field,
        reason: format!("{value} is negative"),
    })
}
