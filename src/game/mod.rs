//! Economy Module
//!
//! Player balances, the store catalog, and the two transaction flows.
//! Everything here talks to the injected [`Store`](crate::store::Store) and
//! nothing else; authorization and notifications live in `network/`.
//!
//! ## Module Structure
//!
//! - `player`: Player record and public balances
//! - `ledger`: Arrival, balance overrides, purchase commits
//! - `catalog`: Store items and channel exclusivity
//! - `purchase`: Point purchase state machine
//! - `reward`: Bits SKU rewards, upgrades, audit log
//! - `launch`: Launch queue
//! - `usage`: Level-start telemetry

pub mod player;
pub mod ledger;
pub mod catalog;
pub mod purchase;
pub mod reward;
pub mod launch;
pub mod usage;

// Re-export key types
pub use player::{Player, PlayerView, DEFAULT_POINTS, DEFAULT_PUCK_COUNT};
pub use ledger::{BalanceUpdate, Ledger, LedgerError};
pub use catalog::{Catalog, StoreItem, TWITCHCON_TRAIL_ITEM};
pub use purchase::{PurchaseEngine, PurchaseError, PurchaseReceipt, PurchaseStage};
pub use reward::{BitsCost, BitsPurchase, RewardEngine, RewardError, Upgrade};
pub use launch::{LaunchError, LaunchQueue, LaunchSelection};
pub use usage::{UsageReport, UsageTracker};
