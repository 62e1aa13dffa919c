//! Launch queue.
//!
//! Launches are opaque objects queued by viewers and consumed by the game
//! client. Each needs an `id`; `pucks` is optional, and a launch carrying
//! zero or negative pucks is dropped silently.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::ids::push_ids;
use crate::store::{Store, StoreError};

/// Field holding the submitting player on persisted launches.
pub const SUBMITTER_FIELD: &str = "playerId";

/// Launch queue failures.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The body was not a JSON array.
    #[error("launch body must be an array")]
    NotAnArray,

    /// An element was not an object.
    #[error("launch {0} is not an object")]
    NotAnObject(usize),

    /// An element had no `id`.
    #[error("launch {0} has no id")]
    MissingId(usize),

    /// An element carried a non-numeric `pucks`.
    #[error("launch {0} has non-numeric pucks")]
    InvalidPucks(usize),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which launches to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSelection {
    /// The whole queue.
    All,
    /// Specific launch keys.
    Keys(Vec<String>),
}

/// Validate a launch body and drop launches without a positive puck count.
///
/// Validation covers every element before any filtering, so one bad element
/// rejects the whole body.
pub fn accepted_launches(body: Value) -> Result<Vec<Map<String, Value>>, LaunchError> {
    let Value::Array(items) = body else {
        return Err(LaunchError::NotAnArray);
    };

    let mut launches = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(launch) = item else {
            return Err(LaunchError::NotAnObject(index));
        };
        if launch.get("id").map_or(true, Value::is_null) {
            return Err(LaunchError::MissingId(index));
        }
        match launch.get("pucks") {
            None | Some(Value::Null) => {}
            Some(Value::Number(_)) => {}
            Some(_) => return Err(LaunchError::InvalidPucks(index)),
        }
        launches.push(launch);
    }

    Ok(launches
        .into_iter()
        .filter(|launch| {
            launch
                .get("pucks")
                .and_then(Value::as_f64)
                .map_or(true, |pucks| pucks > 0.0)
        })
        .collect())
}

/// Path of a channel's launch queue.
pub fn launches_path(channel_id: &str) -> String {
    format!("channels/{channel_id}/launches")
}

/// Queue of launches per channel.
#[derive(Clone)]
pub struct LaunchQueue {
    store: Arc<dyn Store>,
}

impl LaunchQueue {
    /// Create a queue over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and append launches. Returns how many were persisted.
    #[instrument(skip(self, body))]
    pub async fn enqueue(
        &self,
        channel_id: &str,
        player_id: &str,
        body: Value,
    ) -> Result<usize, LaunchError> {
        let launches = accepted_launches(body)?;
        if launches.is_empty() {
            debug!("no launches survived filtering");
            return Ok(0);
        }

        let base = launches_path(channel_id);
        let keys = push_ids(launches.len());
        let updates: BTreeMap<String, Value> = keys
            .into_iter()
            .zip(launches)
            .map(|(key, mut launch)| {
                launch.insert(SUBMITTER_FIELD.to_string(), json!(player_id));
                (format!("{base}/{key}"), Value::Object(launch))
            })
            .collect();

        let count = updates.len();
        self.store.update(updates).await?;
        info!(count, "launches queued");
        Ok(count)
    }

    /// Delete launches from a channel's queue.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        channel_id: &str,
        selection: &LaunchSelection,
    ) -> Result<(), StoreError> {
        let base = launches_path(channel_id);
        match selection {
            LaunchSelection::All => self.store.remove(&base).await,
            LaunchSelection::Keys(keys) => {
                let updates = keys
                    .iter()
                    .map(|key| (format!("{base}/{key}"), Value::Null))
                    .collect::<BTreeMap<_, _>>();
                if updates.is_empty() {
                    return Ok(());
                }
                self.store.update(updates).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn test_filters_non_positive_pucks() {
        let body = json!([
            {"id": "a", "pucks": 3},
            {"id": "b", "pucks": 0},
            {"id": "c", "pucks": -2},
            {"id": "d"},
            {"id": "e", "pucks": null},
            {"id": "f", "pucks": 0.5}
        ]);
        let ids: Vec<_> = accepted_launches(body)
            .unwrap()
            .iter()
            .map(|l| l["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "d", "e", "f"]);
    }

    #[test]
    fn test_rejects_bad_bodies() {
        assert!(matches!(accepted_launches(json!({"id": "a"})), Err(LaunchError::NotAnArray)));
        assert!(matches!(accepted_launches(json!([{"pucks": 1}])), Err(LaunchError::MissingId(0))));
        assert!(matches!(
            accepted_launches(json!([{"id": "a"}, {"id": null}])),
            Err(LaunchError::MissingId(1))
        ));
        assert!(matches!(accepted_launches(json!([7])), Err(LaunchError::NotAnObject(0))));
        assert!(matches!(
            accepted_launches(json!([{"id": "a", "pucks": "lots"}])),
            Err(LaunchError::InvalidPucks(0))
        ));
    }

    #[test]
    fn test_missing_id_rejects_even_if_filtered() {
        let result = accepted_launches(json!([{"pucks": 0}]));
        assert!(matches!(result, Err(LaunchError::MissingId(0))));
    }

    proptest! {
        #[test]
        fn prop_only_positive_or_absent_pucks_survive(
            pucks in proptest::collection::vec(proptest::option::of(-5i64..5), 0..20)
        ) {
            let body = Value::Array(
                pucks
                    .iter()
                    .enumerate()
                    .map(|(i, p)| match p {
                        Some(p) => json!({"id": i, "pucks": p}),
                        None => json!({"id": i}),
                    })
                    .collect(),
            );
            let accepted = accepted_launches(body).unwrap();
            let expected: Vec<u64> = pucks
                .iter()
                .enumerate()
                .filter(|(_, p)| p.map_or(true, |p| p > 0))
                .map(|(i, _)| i as u64)
                .collect();
            let got: Vec<u64> = accepted.iter().map(|l| l["id"].as_u64().unwrap()).collect();
            prop_assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_enqueue_persists_in_order_with_submitter() {
        let store = Arc::new(MemoryStore::new());
        let queue = LaunchQueue::new(store.clone());
        let count = queue
            .enqueue(
                "c1",
                "p1",
                json!([{"id": "a", "pucks": 2}, {"id": "b", "pucks": 0}, {"id": "c"}]),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);

        let stored = store.get(&launches_path("c1")).await.unwrap().unwrap();
        let launches: Vec<&Value> = stored.as_object().unwrap().values().collect();
        assert_eq!(launches[0]["id"], "a");
        assert_eq!(launches[1]["id"], "c");
        assert!(launches.iter().all(|l| l[SUBMITTER_FIELD] == "p1"));
    }

    #[tokio::test]
    async fn test_enqueue_all_filtered_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let queue = LaunchQueue::new(store.clone());
        assert_eq!(queue.enqueue("c1", "p1", json!([{"id": "a", "pucks": 0}])).await.unwrap(), 0);
        assert!(store.get(&launches_path("c1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_selected_and_all() {
        let store = Arc::new(MemoryStore::new());
        let queue = LaunchQueue::new(store.clone());
        store.set("channels/c1/launches/k1", json!({"id": 1})).await.unwrap();
        store.set("channels/c1/launches/k2", json!({"id": 2})).await.unwrap();
        store.set("channels/c1/launches/k3", json!({"id": 3})).await.unwrap();

        queue
            .delete("c1", &LaunchSelection::Keys(vec!["k1".into(), "k3".into()]))
            .await
            .unwrap();
        let remaining = store.get(&launches_path("c1")).await.unwrap().unwrap();
        assert_eq!(remaining, json!({"k2": {"id": 2}}));

        queue.delete("c1", &LaunchSelection::All).await.unwrap();
        assert!(store.get(&launches_path("c1")).await.unwrap().is_none());
    }
}
