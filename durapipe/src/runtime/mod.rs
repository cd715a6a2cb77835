//! In-process host runtime.
//!
//! Owns the instance registry, runs each orchestration instance as its own
//! task and re-executes runs that fail with a replayable defect.

mod engine;
mod instance;

pub use engine::{OrchestrationEngine, UPDATE_ACKNOWLEDGMENT};
pub use instance::{InstanceHandle, InstanceStatus};
