//! Point purchases.
//!
//! ```text
//! Start → ItemValidated → OwnershipChecked → AffordabilityChecked → Committed
//!            │                 │                    │                  │
//!       InvalidItem       AlreadyOwned      InsufficientFunds     Conflict → re-read,
//!                                                                 rerun the checks
//! ```
//!
//! The ownership and affordability checks run on a versioned snapshot, and
//! the commit is conditional on that version. A concurrent duplicate purchase
//! therefore re-reads after losing the race and fails `AlreadyOwned` instead
//! of debiting twice.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::game::catalog::{Catalog, StoreItem};
use crate::game::ledger::{player_path, Ledger, LedgerError};
use crate::game::player::Player;
use crate::store::StoreError;

/// Commit attempts before a purchase gives up on a contended record.
pub const MAX_COMMIT_ATTEMPTS: usize = 8;

/// Purchase state machine stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStage {
    /// Nothing checked yet.
    Start,
    /// The item exists and is sold in this channel.
    ItemValidated,
    /// The player does not own the item yet.
    OwnershipChecked,
    /// The player can pay for it.
    AffordabilityChecked,
    /// Debit and ownership are persisted.
    Committed,
}

/// Purchase failures.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// Unknown item, or not sold in this channel.
    #[error("store item {0} is not available")]
    InvalidItem(String),

    /// The player already owns the item.
    #[error("store item {0} already owned")]
    AlreadyOwned(String),

    /// Not enough points.
    #[error("insufficient funds: item costs {cost}, balance is {balance}")]
    InsufficientFunds {
        /// Item price.
        cost: u64,
        /// Current balance.
        balance: u64,
    },

    /// The player never arrived in this channel.
    #[error("player {0} has not joined this channel")]
    UnknownPlayer(String),

    /// Persistence failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl PurchaseError {
    /// Last stage passed before the failure.
    pub fn stage(&self) -> PurchaseStage {
        match self {
            Self::InvalidItem(_) => PurchaseStage::Start,
            Self::UnknownPlayer(_) | Self::AlreadyOwned(_) => PurchaseStage::ItemValidated,
            Self::InsufficientFunds { .. } => PurchaseStage::OwnershipChecked,
            Self::Ledger(_) => PurchaseStage::AffordabilityChecked,
        }
    }
}

/// Result of a committed purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    /// Item bought.
    pub item_id: String,
    /// Points debited.
    pub cost: u64,
    /// Player record after the commit.
    pub player: Player,
}

/// Run the ownership and affordability gates. Returns the new balance.
pub fn check_purchase(
    player: &Player,
    item_id: &str,
    item: &StoreItem,
) -> Result<u64, PurchaseError> {
    if player.owns(item_id) {
        return Err(PurchaseError::AlreadyOwned(item_id.to_string()));
    }
    player
        .points
        .checked_sub(item.cost)
        .ok_or(PurchaseError::InsufficientFunds {
            cost: item.cost,
            balance: player.points,
        })
}

/// Drives purchases through the ledger.
#[derive(Clone)]
pub struct PurchaseEngine {
    ledger: Ledger,
    catalog: Catalog,
}

impl PurchaseEngine {
    /// Create an engine.
    pub fn new(ledger: Ledger, catalog: Catalog) -> Self {
        Self { ledger, catalog }
    }

    /// Buy `item_id` for a player.
    #[instrument(skip(self))]
    pub async fn purchase(
        &self,
        channel_id: &str,
        player_id: &str,
        item_id: &str,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let item = self
            .catalog
            .get(item_id)
            .await
            .map_err(LedgerError::from)?
            .filter(|item| item.available_in(channel_id))
            .ok_or_else(|| PurchaseError::InvalidItem(item_id.to_string()))?;
        debug!(stage = ?PurchaseStage::ItemValidated, cost = item.cost);

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            let snapshot = self.ledger.get_versioned(channel_id, player_id).await?;
            let player = snapshot
                .value
                .as_ref()
                .ok_or_else(|| PurchaseError::UnknownPlayer(player_id.to_string()))?;

            let new_points = check_purchase(player, item_id, &item)?;
            debug!(stage = ?PurchaseStage::AffordabilityChecked, new_points);

            match self
                .ledger
                .record_purchase(channel_id, player_id, &snapshot, item_id, new_points)
                .await
            {
                Ok(player) => {
                    info!(
                        stage = ?PurchaseStage::Committed,
                        points = player.points,
                        "purchase committed"
                    );
                    return Ok(PurchaseReceipt {
                        item_id: item_id.to_string(),
                        cost: item.cost,
                        player,
                    });
                }
                Err(LedgerError::Conflict) => {
                    warn!(attempt, "player record changed during purchase, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Store(StoreError::Contention(player_path(channel_id, player_id))).into())
    }
}
