//! Usage telemetry.
//!
//! Records level starts per channel for the privileged usage endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::core::ids::push_id;
use crate::game::ledger::players_path;
use crate::store::{self, Store, StoreError};

/// One recorded level start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStart {
    /// Level identifier as sent by the game client.
    pub level: Value,
    /// Player who started it, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    /// When it was recorded.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

/// Usage summary of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Channel reported on.
    pub channel_id: String,
    /// Total level starts.
    pub level_start_count: u64,
    /// Recorded level starts in key order.
    pub levels_started: Vec<LevelStart>,
    /// Players ever seen in the channel.
    pub player_count: usize,
}

fn usage_path(channel_id: &str) -> String {
    format!("usage/{channel_id}")
}

/// Records and reports usage.
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn Store>,
}

impl UsageTracker {
    /// Create a tracker over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a level start and bump the channel counter. Returns the new count.
    #[instrument(skip(self, level))]
    pub async fn level_started(
        &self,
        channel_id: &str,
        level: Value,
        player_id: Option<String>,
    ) -> Result<u64, StoreError> {
        let base = usage_path(channel_id);
        let entry_path = format!("{base}/levelsStarted/{}", push_id());
        let entry = LevelStart {
            level,
            player_id,
            time: Utc::now(),
        };
        self.store
            .set(&entry_path, store::encode(&entry_path, &entry)?)
            .await?;

        let counter_path = format!("{base}/levelStartCount");
        let committed = store::transaction(self.store.as_ref(), &counter_path, |current| {
            let count = current.and_then(Value::as_u64).unwrap_or(0);
            Some(json!(count + 1))
        })
        .await?;
        let count = committed.as_ref().and_then(Value::as_u64).unwrap_or(0);
        debug!(count, "level start recorded");
        Ok(count)
    }

    /// Summarize a channel.
    pub async fn report(&self, channel_id: &str) -> Result<UsageReport, StoreError> {
        let base = usage_path(channel_id);
        let level_start_count = self
            .store
            .get(&format!("{base}/levelStartCount"))
            .await?
            .as_ref()
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let levels: Option<BTreeMap<String, LevelStart>> =
            store::read(self.store.as_ref(), &format!("{base}/levelsStarted")).await?;
        let player_count = self
            .store
            .get(&players_path(channel_id))
            .await?
            .as_ref()
            .and_then(Value::as_object)
            .map_or(0, |players| players.len());

        Ok(UsageReport {
            channel_id: channel_id.to_string(),
            level_start_count,
            levels_started: levels.unwrap_or_default().into_values().collect(),
            player_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_level_started_counts() {
        let store = Arc::new(MemoryStore::new());
        let usage = UsageTracker::new(store.clone());

        assert_eq!(usage.level_started("c1", json!("rink-1"), Some("p1".into())).await.unwrap(), 1);
        assert_eq!(usage.level_started("c1", json!(2), None).await.unwrap(), 2);
        store.set("channels/c1/players/p1", json!({"points": 0})).await.unwrap();

        let report = usage.report("c1").await.unwrap();
        assert_eq!(report.level_start_count, 2);
        assert_eq!(report.levels_started.len(), 2);
        let first = report
            .levels_started
            .iter()
            .find(|start| start.level == json!("rink-1"))
            .unwrap();
        assert_eq!(first.player_id.as_deref(), Some("p1"));
        assert_eq!(report.player_count, 1);
    }

    #[tokio::test]
    async fn test_empty_report() {
        let usage = UsageTracker::new(Arc::new(MemoryStore::new()));
        let report = usage.report("c1").await.unwrap();
        assert_eq!(report.level_start_count, 0);
        assert!(report.levels_started.is_empty());
        assert_eq!(report.player_count, 0);
    }
}
