//! # Puck Rush Server
//!
//! Economy, authorization and notification backend for the Puck Rush
//! channel extension.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PUCK RUSH SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── hash.rs     - Trust hashes and content tags             │
//! │  └── ids.rs      - Push-style record keys                    │
//! │                                                              │
//! │  store/          - External key-value tree                   │
//! │  ├── mod.rs      - Store trait, CAS transaction helper       │
//! │  ├── memory.rs   - In-process tree                           │
//! │  └── remote.rs   - Realtime-database REST adapter            │
//! │                                                              │
//! │  game/           - Economy                                   │
//! │  ├── ledger.rs   - Player balances                           │
//! │  ├── purchase.rs - Point purchase state machine              │
//! │  ├── reward.rs   - Bits SKU rewards                          │
//! │  ├── launch.rs   - Launch queue                              │
//! │  └── usage.rs    - Level-start telemetry                     │
//! │                                                              │
//! │  network/        - HTTP surface and platform clients         │
//! │  ├── auth.rs     - Extension token verification              │
//! │  ├── trust.rs    - Trust hash issue and check                │
//! │  ├── dispatch.rs - Whispers, broadcasts, chat                │
//! │  └── server.rs   - Router and listener                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! verify credentials → read or mutate the ledger through an engine → notify.
//! Balances are never cached in process; every request re-reads the store,
//! and purchases commit with a compare-and-swap against the record they
//! checked.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use game::{Ledger, Player, PlayerView, PurchaseEngine, RewardEngine};
pub use network::{router, serve, AppConfig, AppState};
pub use store::{MemoryStore, RemoteStore, Store, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
