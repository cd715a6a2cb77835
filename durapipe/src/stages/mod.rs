//! Stage invocation boundary.
//!
//! Stages are externally executed units of work. The orchestrator reaches
//! them only through [`StageWorker`], which keeps every non-deterministic
//! effect (I/O, clocks, randomness) outside the orchestration logic.

mod heartbeat;
mod invocation;

pub use heartbeat::Heartbeat;
pub use invocation::{invoke_stage, InvocationOptions, InvocationReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::PipelineRequest;
use crate::errors::StageError;

/// Names of the externally executed stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Worker discovery.
    Discover,
    /// Input validation; returns accept/reject.
    Validate,
    /// Data extraction.
    Extract,
    /// Data transformation.
    Transform,
    /// Data loading.
    Load,
    /// Poll for completion of the downstream job.
    Poll,
}

impl StageName {
    /// Returns the stage name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Validate => "validate",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Affinity token pinning stage invocations to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionChannel(String);

impl ExecutionChannel {
    /// Creates a channel from a task queue name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One request to run a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCall {
    /// The stage to run.
    pub stage: StageName,
    /// The effective request the stage receives.
    pub request: PipelineRequest,
    /// The pinned channel, if the stage is routed through one.
    pub channel: Option<ExecutionChannel>,
    /// The declared orchestration type name.
    pub workflow_type: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl StageCall {
    /// Creates a first-attempt call.
    #[must_use]
    pub fn new(
        stage: StageName,
        request: PipelineRequest,
        channel: Option<ExecutionChannel>,
        workflow_type: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            request,
            channel,
            workflow_type: workflow_type.into(),
            attempt: 1,
        }
    }
}

/// Successful result of a stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    /// Accept/reject verdict of the validate stage.
    Validation(bool),
    /// Opaque status payload of every other stage.
    Payload(String),
}

impl StageOutput {
    /// Returns the validation verdict, if this is one.
    #[must_use]
    pub const fn as_validation(&self) -> Option<bool> {
        match self {
            Self::Validation(accepted) => Some(*accepted),
            Self::Payload(_) => None,
        }
    }
}

impl fmt::Display for StageOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(accepted) => write!(f, "validation={accepted}"),
            Self::Payload(payload) => f.write_str(payload),
        }
    }
}

/// The worker side of the stage invocation boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// Finds a worker and returns the channel later stages are pinned to.
    async fn discover(&self) -> Result<ExecutionChannel, StageError>;

    /// Runs one attempt of a stage.
    ///
    /// Long-running stages must call [`Heartbeat::beat`] more often than the
    /// idle budget, or the attempt is treated as stalled.
    async fn invoke(&self, call: StageCall, heartbeat: Heartbeat) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_display() {
        assert_eq!(StageName::Validate.to_string(), "validate");
        assert_eq!(StageName::Poll.to_string(), "poll");
        assert_eq!(
            serde_json::to_string(&StageName::Transform).unwrap(),
            r#""transform""#
        );
    }

    #[test]
    fn test_stage_output_validation() {
        assert_eq!(StageOutput::Validation(false).as_validation(), Some(false));
        assert_eq!(StageOutput::Payload("ok".into()).as_validation(), None);
    }

    #[test]
    fn test_stage_output_serialize() {
        let json = serde_json::to_value(StageOutput::Payload("extracted".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "payload", "value": "extracted"}));
    }

    #[test]
    fn test_stage_call_starts_at_first_attempt() {
        let call = StageCall::new(
            StageName::Extract,
            PipelineRequest::new("a.csv", "green"),
            Some(ExecutionChannel::new("worker-1")),
            "DataPipelineWorkflowHappyPath",
        );
        assert_eq!(call.attempt, 1);
        assert_eq!(call.channel.unwrap().as_str(), "worker-1");
    }
}
