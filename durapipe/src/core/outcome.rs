//! Terminal results reported to orchestration callers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::OrchestrationError;

/// The final outcome of one orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalResult {
    /// The pipeline completed.
    Success {
        /// Completion message naming the processed file.
        message: String,
    },
    /// Validation rejected the input and the variant treats that as a soft outcome.
    Invalidated,
    /// The run failed.
    Failed {
        /// The rendered cause chain.
        cause: String,
        /// Whether the failure was classified as transient.
        retryable: bool,
    },
}

impl TerminalResult {
    /// Creates a success result for the processed file.
    #[must_use]
    pub fn processed(input_filename: &str) -> Self {
        Self::Success {
            message: format!("Successfully processed: {input_filename}!"),
        }
    }

    /// Builds a failed result from an orchestration error.
    #[must_use]
    pub fn from_error(err: &OrchestrationError) -> Self {
        Self::Failed {
            cause: err.cause_chain(),
            retryable: err.is_retryable(),
        }
    }

    /// Returns true for [`TerminalResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true for [`TerminalResult::Failed`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl fmt::Display for TerminalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { message } => write!(f, "{message}"),
            Self::Invalidated => write!(f, "invalidated"),
            Self::Failed { cause, retryable } => {
                write!(f, "failed (retryable={retryable}): {cause}")
            }
        }
    }
}
