//! In-process tree store.
//!
//! Backs tests and local runs. The whole tree sits behind one async lock,
//! which makes multi-path updates and compare-and-swap trivially atomic.

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{Etag, Store, StoreError, Versioned};
use crate::core::hash::content_tag;

/// Tree store held in memory.
pub struct MemoryStore {
    root: RwLock<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    /// Create a store seeded with `root`.
    pub fn with_root(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Clone of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn lookup<'v>(root: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(*segment)?;
    }
    (!is_empty(node)).then_some(node)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Write `value` at `segments` below `node`, pruning emptied parents.
fn assign(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            // Nothing lives below a leaf, so there is nothing to delete.
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Object(children) = node {
        let child = children.entry((*head).to_string()).or_insert(Value::Null);
        assign(child, rest, value);
        if is_empty(child) {
            children.remove(*head);
        }
    }
}

fn overlapping(paths: &[Vec<&str>]) -> Option<usize> {
    paths.iter().enumerate().find_map(|(i, a)| {
        paths
            .iter()
            .enumerate()
            .any(|(j, b)| i != j && b.len() >= a.len() && b[..a.len()] == a[..])
            .then_some(i)
    })
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move {
            let root = self.root.read().await;
            Ok(lookup(&root, &segments(path)).cloned())
        })
    }

    fn get_versioned<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Versioned<Value>, StoreError>> {
        Box::pin(async move {
            let root = self.root.read().await;
            let value = lookup(&root, &segments(path)).cloned();
            let etag = Etag(content_tag(value.as_ref()));
            Ok(Versioned { value, etag })
        })
    }

    fn set<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut root = self.root.write().await;
            assign(&mut root, &segments(path), value);
            Ok(())
        })
    }

    fn set_if<'a>(
        &'a self,
        path: &'a str,
        value: Value,
        expected: &'a Etag,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut root = self.root.write().await;
            let segments = segments(path);
            if content_tag(lookup(&root, &segments)) != expected.0 {
                return Ok(false);
            }
            assign(&mut root, &segments, value);
            Ok(true)
        })
    }

    fn update<'a>(
        &'a self,
        updates: BTreeMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let paths: Vec<Vec<&str>> = updates.keys().map(|p| segments(p)).collect();
            if let Some(index) = overlapping(&paths) {
                let path = updates.keys().nth(index).cloned().unwrap_or_default();
                return Err(StoreError::InvalidPath(path));
            }

            let mut root = self.root.write().await;
            for (segments, value) in paths.iter().zip(updates.values()) {
                assign(&mut root, segments, value.clone());
            }
            Ok(())
        })
    }
}
