//! External Key-Value Tree
//!
//! Every piece of persistent state (players, catalog, audit log, trust records)
//! lives in an ordered key-value tree addressed by slash-separated paths.
//! Components receive the tree as an injected `Arc<dyn Store>`.
//!
//! Semantics follow the realtime-database model:
//! - Writing `null` deletes a node; empty objects are not kept
//! - `update` writes several paths as one atomic unit
//! - `set_if` is a compare-and-swap against the tag from `get_versioned`

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub mod memory;
pub mod remote;

pub use memory::MemoryStore;
pub use remote::{RemoteStore, RemoteStoreConfig};

/// Attempts made by [`transaction`] before giving up.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 8;

/// Opaque version tag of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(pub String);

/// A node read together with its version tag.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// Node content, `None` if absent.
    pub value: Option<T>,
    /// Tag to pass to [`Store::set_if`].
    pub etag: Etag,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request did not complete within the configured timeout.
    #[error("store request timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("store transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("store rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// A node could not be decoded into the expected record.
    #[error("malformed record at {path}: {reason}")]
    Malformed {
        /// Node path.
        path: String,
        /// Decode failure.
        reason: String,
    },

    /// A multi-path update contained overlapping paths.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A compare-and-swap loop kept losing to concurrent writers.
    #[error("transaction on {0} did not settle")]
    Contention(String),
}

/// Capability over the external tree.
pub trait Store: Send + Sync {
    /// Read a node.
    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    /// Read a node together with its version tag.
    fn get_versioned<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Versioned<Value>, StoreError>>;

    /// Replace a node. `Value::Null` deletes it.
    fn set<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Replace a node only if its tag still equals `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    fn set_if<'a>(
        &'a self,
        path: &'a str,
        value: Value,
        expected: &'a Etag,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Write several paths atomically.
    fn update<'a>(
        &'a self,
        updates: BTreeMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Delete a node.
    fn remove<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.set(path, Value::Null)
    }
}

/// Whether `segment` can be used as a single path component.
///
/// Rejects empty segments and the characters the tree reserves.
pub fn is_valid_key(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 768
        && !segment
            .chars()
            .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control())
}

/// Read and decode a node.
pub async fn read<T: DeserializeOwned>(
    store: &dyn Store,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(value) => decode(path, value).map(Some),
        None => Ok(None),
    }
}

/// Read and decode a node with its tag.
pub async fn read_versioned<T: DeserializeOwned>(
    store: &dyn Store,
    path: &str,
) -> Result<Versioned<T>, StoreError> {
    let Versioned { value, etag } = store.get_versioned(path).await?;
    let value = match value {
        Some(value) => Some(decode(path, value)?),
        None => None,
    };
    Ok(Versioned { value, etag })
}

/// Decode a node into a record.
pub fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a record for writing.
pub fn encode<T: Serialize>(path: &str, record: &T) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Run a read-modify-write on one node.
///
/// `apply` receives the current content and returns the new content, or
/// `None` to abort without writing. The write is conditional on the node
/// being unchanged since the read; on conflict the loop re-reads and calls
/// `apply` again. Returns the committed content, or `None` if aborted.
pub async fn transaction<F>(
    store: &dyn Store,
    path: &str,
    mut apply: F,
) -> Result<Option<Value>, StoreError>
where
    F: FnMut(Option<&Value>) -> Option<Value> + Send,
{
    for attempt in 0..MAX_TRANSACTION_ATTEMPTS {
        let current = store.get_versioned(path).await?;
        let Some(next) = apply(current.value.as_ref()) else {
            return Ok(None);
        };
        if store.set_if(path, next.clone(), &current.etag).await? {
            return Ok(Some(next));
        }
        debug!(path, attempt, "transaction conflict, retrying");
    }
    Err(StoreError::Contention(path.to_string()))
}
