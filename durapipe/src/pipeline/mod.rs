//! Pipeline orchestration.
//!
//! This module provides:
//! - The stage sequencer driving the fixed five-stage pipeline
//! - Scenario variants and their strategies
//! - Worker affinity resolution and the human-in-the-loop gate
//! - Retry policies governing stage invocations

mod affinity;
mod context;
mod gate;
mod retry;
mod scenario;
mod sequencer;


pub use affinity::WorkerAffinity;
pub use context::{ContextServices, OrchestrationContext};
pub use gate::HumanGate;
pub use retry::{should_retry, RetryDecision, RetryPolicy, RetryState};
pub use scenario::{
    CompletionStep, Milestone, RejectionPolicy, ScenarioStrategy, ScenarioVariant, StageDirective,
};
pub use sequencer::StageSequencer;
