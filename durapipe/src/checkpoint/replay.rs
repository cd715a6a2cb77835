//! Deterministic replay over a loaded journal.

use std::collections::VecDeque;

use super::{CheckpointEntry, CheckpointRecord};
use crate::errors::OrchestrationError;

/// Hands recorded entries back to a re-executing orchestration.
#[derive(Debug, Default)]
pub struct ReplayCursor {
    pending: VecDeque<CheckpointEntry>,
    replayed: usize,
}

impl ReplayCursor {
    /// Creates a cursor over previously recorded entries.
    #[must_use]
    pub fn new(entries: Vec<CheckpointEntry>) -> Self {
        Self {
            pending: entries.into(),
            replayed: 0,
        }
    }

    /// Returns true while recorded entries remain.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns how many entries have been consumed.
    #[must_use]
    pub const fn replayed(&self) -> usize {
        self.replayed
    }

    /// Consumes the next entry if it records the operation being attempted.
    ///
    /// Returns `Ok(None)` once the journal is exhausted and the operation must
    /// run live. A recorded entry for a different operation means the run
    /// diverged from its history.
    pub fn next_matching(
        &mut self,
        expected: &str,
        matches: impl FnOnce(&CheckpointRecord) -> bool,
    ) -> Result<Option<CheckpointRecord>, OrchestrationError> {
        let Some(entry) = self.pending.front() else {
            return Ok(None);
        };
        if !matches(&entry.record) {
            return Err(OrchestrationError::NonDeterminism {
                expected: expected.to_string(),
                found: entry.record.to_string(),
            });
        }
        self.replayed += 1;
        Ok(self.pending.pop_front().map(|entry| entry.record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(sequence: u64, record: CheckpointRecord) -> CheckpointEntry {
        CheckpointEntry {
            sequence,
            recorded_at: Utc::now(),
            record,
        }
    }

    #[test]
    fn test_empty_cursor_runs_live() {
        let mut cursor = ReplayCursor::default();
        assert!(!cursor.is_replaying());
        assert_eq!(cursor.next_matching("timer", |_| true).unwrap(), None);
    }

    #[test]
    fn test_matching_entries_are_consumed_in_order() {
        let mut cursor = ReplayCursor::new(vec![
            entry(0, CheckpointRecord::TimerFired { duration_ms: 2000 }),
            entry(
                1,
                CheckpointRecord::MetadataTagged {
                    key: "Step".into(),
                    value: "validation".into(),
                },
            ),
        ]);

        let timer = cursor
            .next_matching("timer", |r| matches!(r, CheckpointRecord::TimerFired { .. }))
            .unwrap();
        assert_eq!(timer, Some(CheckpointRecord::TimerFired { duration_ms: 2000 }));
        assert!(cursor.is_replaying());

        cursor
            .next_matching("tag", |r| matches!(r, CheckpointRecord::MetadataTagged { .. }))
            .unwrap();
        assert!(!cursor.is_replaying());
        assert_eq!(cursor.replayed(), 2);
    }

    #[test]
    fn test_divergence_is_non_determinism() {
        let mut cursor = ReplayCursor::new(vec![entry(0, CheckpointRecord::TimerFired { duration_ms: 2000 })]);

        let err = cursor
            .next_matching("metadata_tagged(Step=extract)", |r| {
                matches!(r, CheckpointRecord::MetadataTagged { .. })
            })
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::NonDeterminism { .. }));
        assert!(err.to_string().contains("timer_fired(2000ms)"));
        assert!(cursor.is_replaying());
    }
}
