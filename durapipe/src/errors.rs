//! Error types for the durapipe orchestration core.
//!
//! The taxonomy separates input errors, domain failures and transient stage
//! failures so the host runtime can decide what to retry, what to replay and
//! what to surface to the caller.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::core::{ConfirmationKind, InstanceId};
use crate::stages::StageName;

/// The main error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The declared orchestration type name is not one of the known variants.
    #[error("Unknown pipeline variant: '{name}'")]
    UnknownVariant {
        /// The declared type name.
        name: String,
    },

    /// The pipeline request failed its shape checks.
    #[error("Malformed pipeline request: {reason}")]
    MalformedRequest {
        /// Why the request was rejected.
        reason: String,
    },

    /// Validation rejected the input and the active variant escalates.
    #[error("Workflow failed due to validation")]
    ValidationFailed {
        /// The domain-level cause.
        #[source]
        source: ValidationRejected,
    },

    /// A defect in the orchestration logic itself.
    ///
    /// The host treats this as a failed orchestration task and replays the
    /// run from its journal.
    #[error("{message}")]
    Defect {
        /// The defect message.
        message: String,
    },

    /// The human-in-the-loop gate gave up waiting.
    #[error("Load did not complete before timeout")]
    ConfirmationTimeout {
        /// Which confirmation channel was awaited.
        kind: ConfirmationKind,
        /// How long the gate waited.
        timeout: Duration,
    },

    /// Worker discovery failed; there is no fallback worker selection.
    #[error("Worker discovery failed: {0}")]
    WorkerDiscovery(#[source] StageError),

    /// A stage failed after its retry policy was exhausted.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A replayed run diverged from its recorded history.
    #[error("Non-deterministic replay: expected {expected}, journal holds {found}")]
    NonDeterminism {
        /// The operation the orchestration attempted.
        expected: String,
        /// The record found in the journal.
        found: String,
    },

    /// The run was cancelled by the host.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// No instance with this id is known to the engine.
    #[error("Orchestration instance not found: {id}")]
    InstanceNotFound {
        /// The instance id.
        id: InstanceId,
    },

    /// The instance already reached a terminal result.
    #[error("Orchestration instance {id} is closed")]
    InstanceClosed {
        /// The instance id.
        id: InstanceId,
    },

    /// The instance has not reached a terminal result yet.
    #[error("Orchestration instance {id} is still running")]
    InstanceRunning {
        /// The instance id.
        id: InstanceId,
    },

    /// The checkpoint journal could not be read or written.
    #[error("Checkpoint journal error: {0}")]
    Journal(String),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl OrchestrationError {
    /// Creates a defect error.
    #[must_use]
    pub fn defect(message: impl Into<String>) -> Self {
        Self::Defect {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns true if the failure is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Defect { .. } => true,
            Self::Stage(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the host should re-execute the run from its journal.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Defect { .. })
    }

    /// Returns the short type tag used in structured reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownVariant { .. } => "UnknownVariant",
            Self::MalformedRequest { .. } => "MalformedRequest",
            Self::ValidationFailed { .. } => "ValidationFailed",
            Self::Defect { .. } => "Defect",
            Self::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            Self::WorkerDiscovery(_) => "WorkerDiscovery",
            Self::Stage(_) => "StageFailure",
            Self::NonDeterminism { .. } => "NonDeterminism",
            Self::Cancelled { .. } => "Cancelled",
            Self::InstanceNotFound { .. } => "InstanceNotFound",
            Self::InstanceClosed { .. } => "InstanceClosed",
            Self::InstanceRunning { .. } => "InstanceRunning",
            Self::Journal(_) => "Journal",
            Self::Config(_) => "Config",
        }
    }

    /// Renders the error and its source chain as `outer: inner: ...`.
    #[must_use]
    pub fn cause_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !rendered.ends_with(&text) {
                rendered.push_str(": ");
                rendered.push_str(&text);
            }
            source = cause.source();
        }
        rendered
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("cause".to_string(), serde_json::json!(self.cause_chain()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));

        match self {
            Self::ConfirmationTimeout { kind, timeout } => {
                map.insert("confirmation".to_string(), serde_json::json!(kind.to_string()));
                map.insert("timeout_seconds".to_string(), serde_json::json!(timeout.as_secs()));
            }
            Self::Stage(err) | Self::WorkerDiscovery(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.stage().to_string()));
            }
            _ => {}
        }

        map
    }
}

/// Domain cause attached to a validation failure.
#[derive(Debug, Clone, Error)]
#[error("Validation Failed")]
pub struct ValidationRejected {
    /// The file whose validation was rejected.
    pub input_filename: String,
}

impl ValidationRejected {
    /// Creates a new rejection cause.
    #[must_use]
    pub fn new(input_filename: impl Into<String>) -> Self {
        Self {
            input_filename: input_filename.into(),
        }
    }
}

/// A classified failure of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Transient failure; the invocation may be attempted again.
    #[error("Stage '{stage}' failed: {message}")]
    Retryable {
        /// The stage that failed.
        stage: StageName,
        /// The failure message.
        message: String,
    },

    /// Permanent failure; never retried.
    #[error("Stage '{stage}' failed permanently: {message}")]
    Fatal {
        /// The stage that failed.
        stage: StageName,
        /// The failure message.
        message: String,
    },

    /// The attempt did not finish within its time budget.
    #[error("Stage '{stage}' exceeded its {}s time budget", budget.as_secs())]
    TimedOut {
        /// The stage that timed out.
        stage: StageName,
        /// The budget that elapsed.
        budget: Duration,
    },

    /// The attempt neither finished nor heartbeat within its idle budget.
    #[error("Stage '{stage}' sent no heartbeat within {}s", idle.as_secs())]
    HeartbeatTimeout {
        /// The stalled stage.
        stage: StageName,
        /// The idle budget that elapsed.
        idle: Duration,
    },
}

impl StageError {
    /// Creates a retryable stage failure.
    #[must_use]
    pub fn retryable(stage: StageName, message: impl Into<String>) -> Self {
        Self::Retryable {
            stage,
            message: message.into(),
        }
    }

    /// Creates a fatal stage failure.
    #[must_use]
    pub fn fatal(stage: StageName, message: impl Into<String>) -> Self {
        Self::Fatal {
            stage,
            message: message.into(),
        }
    }

    /// Returns the stage the failure belongs to.
    #[must_use]
    pub fn stage(&self) -> StageName {
        match self {
            Self::Retryable { stage, .. }
            | Self::Fatal { stage, .. }
            | Self::TimedOut { stage, .. }
            | Self::HeartbeatTimeout { stage, .. } => *stage,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A field holds a value the orchestrator cannot run with.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failure_keeps_cause_chain() {
        let err = OrchestrationError::ValidationFailed {
            source: ValidationRejected::new("data.csv"),
        };

        assert_eq!(err.to_string(), "Workflow failed due to validation");
        assert_eq!(
            err.cause_chain(),
            "Workflow failed due to validation: Validation Failed"
        );
        assert!(!err.is_retryable());
        assert!(!err.is_replayable());
    }

    #[test]
    fn test_defect_is_replayable() {
        let err = OrchestrationError::defect("Workflow bug!");
        assert!(err.is_retryable());
        assert!(err.is_replayable());
        assert_eq!(err.cause_chain(), "Workflow bug!");
    }

    #[test]
    fn test_stage_error_classification() {
        assert!(StageError::retryable(StageName::Poll, "still running").is_retryable());
        assert!(!StageError::fatal(StageName::Load, "disk full").is_retryable());
        assert!(StageError::HeartbeatTimeout {
            stage: StageName::Extract,
            idle: Duration::from_secs(20),
        }
        .is_retryable());

        let wrapped = OrchestrationError::from(StageError::fatal(StageName::Load, "disk full"));
        assert!(!wrapped.is_retryable());
    }

    #[test]
    fn test_stage_error_messages() {
        let err = StageError::TimedOut {
            stage: StageName::Transform,
            budget: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "Stage 'transform' exceeded its 300s time budget");
        assert_eq!(err.stage(), StageName::Transform);
    }

    #[test]
    fn test_confirmation_timeout_to_dict() {
        let err = OrchestrationError::ConfirmationTimeout {
            kind: ConfirmationKind::Signal,
            timeout: Duration::from_secs(60),
        };
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "ConfirmationTimeout");
        assert_eq!(dict.get("message").unwrap(), "Load did not complete before timeout");
        assert_eq!(dict.get("timeout_seconds").unwrap(), 60);
        assert_eq!(dict.get("retryable").unwrap(), false);
    }

    #[test]
    fn test_worker_discovery_to_dict() {
        let err = OrchestrationError::WorkerDiscovery(StageError::fatal(
            StageName::Discover,
            "no workers",
        ));
        let dict = err.to_dict();

        assert_eq!(dict.get("stage").unwrap(), "discover");
        assert!(dict
            .get("cause")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("no workers"));
    }
}
