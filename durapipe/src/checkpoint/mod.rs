//! Durable checkpoints and deterministic replay.
//!
//! Every side effect an orchestration performs is recorded in a
//! [`CheckpointJournal`]. When the host re-executes a run, a [`ReplayCursor`]
//! hands the recorded results back in order instead of repeating the effects.

mod fingerprint;
mod journal;
mod replay;

pub use fingerprint::fingerprint;
pub use journal::{CheckpointEntry, CheckpointJournal, CheckpointRecord, InMemoryCheckpointJournal};
pub use replay::ReplayCursor;
