//! Checkpoint journal storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::{ConfirmationKind, InstanceId};
use crate::errors::OrchestrationError;
use crate::stages::{ExecutionChannel, StageName, StageOutput};

/// One durably recorded effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointRecord {
    /// Worker discovery picked a channel.
    ChannelSelected {
        /// The selected channel.
        channel: ExecutionChannel,
    },
    /// A durable timer elapsed.
    TimerFired {
        /// Timer length in milliseconds.
        duration_ms: u64,
    },
    /// A stage completed.
    StageCompleted {
        /// The stage.
        stage: StageName,
        /// Fingerprint of the stage input.
        fingerprint: String,
        /// The stage output.
        output: StageOutput,
        /// Attempts the invocation took.
        attempts: u32,
    },
    /// An indexed metadata tag was published.
    MetadataTagged {
        /// Tag key.
        key: String,
        /// Tag value.
        value: String,
    },
    /// The human-in-the-loop gate opened.
    ConfirmationReceived {
        /// The confirmation channel.
        kind: ConfirmationKind,
    },
}

impl fmt::Display for CheckpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelSelected { channel } => write!(f, "channel_selected({channel})"),
            Self::TimerFired { duration_ms } => write!(f, "timer_fired({duration_ms}ms)"),
            Self::StageCompleted { stage, fingerprint, .. } => {
                write!(f, "stage_completed({stage}, {fingerprint})")
            }
            Self::MetadataTagged { key, value } => write!(f, "metadata_tagged({key}={value})"),
            Self::ConfirmationReceived { kind } => write!(f, "confirmation_received({kind})"),
        }
    }
}

/// A record with its position in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Position in the instance's journal, starting at 0.
    pub sequence: u64,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// The record.
    pub record: CheckpointRecord,
}

/// Durable per-instance history.
#[async_trait]
pub trait CheckpointJournal: Send + Sync {
    /// Loads every entry of an instance in append order.
    async fn load(&self, instance: InstanceId) -> Result<Vec<CheckpointEntry>, OrchestrationError>;

    /// Appends a record and returns the stored entry.
    async fn append(
        &self,
        instance: InstanceId,
        record: CheckpointRecord,
    ) -> Result<CheckpointEntry, OrchestrationError>;

    /// Drops an instance's history.
    async fn clear(&self, instance: InstanceId) -> Result<(), OrchestrationError>;
}

/// In-memory journal.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointJournal {
    entries: Mutex<HashMap<InstanceId, Vec<CheckpointEntry>>>,
}

impl InMemoryCheckpointJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries recorded for an instance.
    #[must_use]
    pub fn len(&self, instance: InstanceId) -> usize {
        self.entries.lock().get(&instance).map_or(0, Vec::len)
    }
}

#[async_trait]
impl CheckpointJournal for InMemoryCheckpointJournal {
    async fn load(&self, instance: InstanceId) -> Result<Vec<CheckpointEntry>, OrchestrationError> {
        Ok(self.entries.lock().get(&instance).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        instance: InstanceId,
        record: CheckpointRecord,
    ) -> Result<CheckpointEntry, OrchestrationError> {
        let mut entries = self.entries.lock();
        let history = entries.entry(instance).or_default();
        let entry = CheckpointEntry {
            sequence: history.len() as u64,
            recorded_at: Utc::now(),
            record,
        };
        history.push(entry.clone());
        Ok(entry)
    }

    async fn clear(&self, instance: InstanceId) -> Result<(), OrchestrationError> {
        self.entries.lock().remove(&instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_sequence() {
        let journal = InMemoryCheckpointJournal::new();
        let id = InstanceId::new();

        let first = journal
            .append(id, CheckpointRecord::TimerFired { duration_ms: 2000 })
            .await
            .unwrap();
        let second = journal
            .append(
                id,
                CheckpointRecord::MetadataTagged {
                    key: "Step".into(),
                    value: "validation".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(journal.len(id), 2);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let journal = InMemoryCheckpointJournal::new();
        let first = InstanceId::new();
        let second = InstanceId::new();

        journal
            .append(first, CheckpointRecord::TimerFired { duration_ms: 1 })
            .await
            .unwrap();

        assert!(journal.load(second).await.unwrap().is_empty());
        journal.clear(first).await.unwrap();
        assert!(journal.load(first).await.unwrap().is_empty());
    }

    #[test]
    fn test_record_serialization() {
        let record = CheckpointRecord::StageCompleted {
            stage: StageName::Load,
            fingerprint: "abc".into(),
            output: StageOutput::Payload("loaded".into()),
            attempts: 1,
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "stage_completed");
        assert_eq!(json["stage"], "load");
        assert_eq!(record.to_string(), "stage_completed(load, abc)");
    }
}
