//! Indexed metadata published by orchestration instances.
//!
//! External observers search instances by their current tag values, for
//! example every instance whose `Step` is `transform`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::InstanceId;

/// Metadata key carrying the pipeline step.
pub const STEP_KEY: &str = "Step";

/// One published tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
    /// When the tag was published.
    pub published_at: DateTime<Utc>,
}

/// Searchable per-instance metadata store.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Sets the current value of `key` for an instance.
    async fn upsert(&self, instance: InstanceId, key: &str, value: &str);

    /// Returns the instances whose current `key` equals `value`.
    fn search(&self, key: &str, value: &str) -> Vec<InstanceId>;

    /// Returns every tag an instance published, in order.
    fn history(&self, instance: InstanceId) -> Vec<MetadataTag>;

    /// Drops every tag of an instance.
    async fn remove(&self, instance: InstanceId);
}

#[derive(Debug, Default)]
struct IndexEntry {
    current: HashMap<String, String>,
    history: Vec<MetadataTag>,
}

/// In-memory metadata index.
#[derive(Debug, Default)]
pub struct InMemoryMetadataIndex {
    entries: RwLock<HashMap<InstanceId, IndexEntry>>,
}

impl InMemoryMetadataIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of `key` for an instance.
    #[must_use]
    pub fn current(&self, instance: InstanceId, key: &str) -> Option<String> {
        self.entries
            .read()
            .get(&instance)
            .and_then(|entry| entry.current.get(key).cloned())
    }
}

#[async_trait]
impl MetadataIndex for InMemoryMetadataIndex {
    async fn upsert(&self, instance: InstanceId, key: &str, value: &str) {
        let mut entries = self.entries.write();
        let entry = entries.entry(instance).or_default();
        entry.current.insert(key.to_string(), value.to_string());
        entry.history.push(MetadataTag {
            key: key.to_string(),
            value: value.to_string(),
            published_at: Utc::now(),
        });
    }

    fn search(&self, key: &str, value: &str) -> Vec<InstanceId> {
        let mut found: Vec<InstanceId> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.current.get(key).is_some_and(|v| v == value))
            .map(|(id, _)| *id)
            .collect();
        found.sort();
        found
    }

    fn history(&self, instance: InstanceId) -> Vec<MetadataTag> {
        self.entries
            .read()
            .get(&instance)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    async fn remove(&self, instance: InstanceId) {
        self.entries.write().remove(&instance);
    }
}
