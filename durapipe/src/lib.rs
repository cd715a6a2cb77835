//! # Durapipe
//!
//! Durable orchestration of a five-stage data pipeline:
//! validate, extract, transform, load and poll-for-completion.
//!
//! Durapipe provides:
//!
//! - **Stage sequencing**: a fixed stage order with monotonic progress checkpoints
//! - **Scenario variants**: a closed set of behavioral deltas layered onto the base sequence
//! - **Durable replay**: every effect is journaled so a re-executed run never repeats it
//! - **Human-in-the-loop**: runs suspend until an external signal or update arrives
//! - **Observation**: progress queries and indexed step metadata
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use durapipe::prelude::*;
//! use durapipe::testing::ScriptedWorker;
//!
//! let engine = OrchestrationEngine::new(Arc::new(ScriptedWorker::new()));
//! let handle = engine.start(
//!     PipelineRequest::new("customers.csv", "green"),
//!     "DataPipelineWorkflowHappyPath",
//! )?;
//!
//! let result = handle.result().await;
//! assert!(result.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod runtime;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{OrchestratorConfig, ReplayPolicy};
    pub use crate::core::{
        Checkpoint, ConfirmationKind, ExecutionState, InstanceId, PipelineRequest, TerminalResult,
    };
    pub use crate::errors::{ConfigError, OrchestrationError, StageError};
    pub use crate::events::{EventSink, LoggingEventSink, MetadataIndex, NoOpEventSink, PipelineEvent};
    pub use crate::pipeline::{RetryPolicy, ScenarioVariant};
    pub use crate::runtime::{InstanceHandle, InstanceStatus, OrchestrationEngine};
    pub use crate::stages::{
        ExecutionChannel, Heartbeat, StageCall, StageName, StageOutput, StageWorker,
    };
}
