//! Orchestration instance records and handles.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cancellation::CancellationToken;
use crate::core::{InstanceId, PipelineRequest, StateCell, TerminalResult};
use crate::pipeline::ScenarioVariant;

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Still executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Validation rejected the input softly.
    Invalidated,
    /// Finished with a failure.
    Failed,
    /// Cancelled by the host.
    Cancelled,
}

impl InstanceStatus {
    /// Returns true once the instance can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Invalidated => "invalidated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Registry entry of one instance.
#[derive(Debug)]
pub(crate) struct InstanceRecord {
    pub(crate) id: InstanceId,
    pub(crate) variant: ScenarioVariant,
    pub(crate) request: PipelineRequest,
    pub(crate) state: Arc<StateCell>,
    pub(crate) cancellation: CancellationToken,
    status: RwLock<InstanceStatus>,
    outcome: watch::Sender<Option<TerminalResult>>,
}

impl InstanceRecord {
    pub(crate) fn new(id: InstanceId, variant: ScenarioVariant, request: PipelineRequest) -> Self {
        let (outcome, _rx) = watch::channel(None);
        Self {
            id,
            variant,
            request,
            state: Arc::new(StateCell::new()),
            cancellation: CancellationToken::new(),
            status: RwLock::new(InstanceStatus::Running),
            outcome,
        }
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        *self.status.read()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.status().is_terminal() || self.state.is_sealed()
    }

    /// Seals the state and publishes the terminal result.
    pub(crate) fn finish(&self, result: TerminalResult) -> InstanceStatus {
        self.state.seal();
        let status = match &result {
            TerminalResult::Success { .. } => InstanceStatus::Completed,
            TerminalResult::Invalidated => InstanceStatus::Invalidated,
            TerminalResult::Failed { .. } if self.cancellation.is_cancelled() => InstanceStatus::Cancelled,
            TerminalResult::Failed { .. } => InstanceStatus::Failed,
        };
        *self.status.write() = status;
        self.outcome.send_replace(Some(result));
        status
    }

    pub(crate) fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            id: self.id,
            outcome: self.outcome.subscribe(),
        }
    }
}

/// Caller-side handle on a started instance.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    id: InstanceId,
    outcome: watch::Receiver<Option<TerminalResult>>,
}

impl InstanceHandle {
    /// The instance id.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the terminal result if the instance has finished.
    #[must_use]
    pub fn try_result(&self) -> Option<TerminalResult> {
        self.outcome.borrow().clone()
    }

    /// Waits for the terminal result.
    pub async fn result(mut self) -> TerminalResult {
        let finished = self
            .outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());
        finished.unwrap_or_else(|| TerminalResult::Failed {
            cause: format!("Orchestration instance {} was dropped", self.id),
            retryable: false,
        })
    }
}
