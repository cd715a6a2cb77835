//! Core data model for pipeline orchestration.
//!
//! This module provides:
//! - The immutable pipeline request and its variant-specific override
//! - The per-instance execution state and progress checkpoints
//! - Terminal results reported to callers

mod identity;
mod outcome;
mod request;
mod state;

pub use identity::InstanceId;
pub use outcome::TerminalResult;
pub use request::{PipelineRequest, ValidationOverride, REJECTED_VALIDATION};
pub use state::{Checkpoint, ConfirmationKind, ExecutionState, StateCell};
