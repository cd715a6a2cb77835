//! Pipeline request and the variant-specific validation override.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::OrchestrationError;

/// Validation policy value that the validate stage always rejects.
pub const REJECTED_VALIDATION: &str = "blue";

/// Immutable input to one orchestration instance.
///
/// The orchestrator never mutates a request. Variants that need different
/// stage input derive a new request through [`PipelineRequest::with_override`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Identifier of the file the pipeline processes.
    pub input_filename: String,

    /// Validation policy value passed to the validate stage.
    pub validation: String,

    /// Stage-specific parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl PipelineRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(input_filename: impl Into<String>, validation: impl Into<String>) -> Self {
        Self {
            input_filename: input_filename.into(),
            validation: validation.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Adds a stage-specific parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Checks the request shape before an instance is created.
    pub fn check(&self) -> Result<(), OrchestrationError> {
        if self.input_filename.trim().is_empty() {
            return Err(OrchestrationError::MalformedRequest {
                reason: "input_filename must not be empty".to_string(),
            });
        }
        if self.input_filename.chars().any(char::is_control) {
            return Err(OrchestrationError::MalformedRequest {
                reason: "input_filename must not contain control characters".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the request stages should see under an optional override.
    #[must_use]
    pub fn with_override(&self, policy: Option<&ValidationOverride>) -> Self {
        match policy {
            Some(policy) => Self {
                validation: policy.validation.clone(),
                ..self.clone()
            },
            None => self.clone(),
        }
    }
}

/// Replacement validation policy applied alongside a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOverride {
    /// The validation value stages receive instead of the caller's.
    pub validation: String,
}

impl ValidationOverride {
    /// Creates an override with the given validation value.
    #[must_use]
    pub fn new(validation: impl Into<String>) -> Self {
        Self {
            validation: validation.into(),
        }
    }

    /// Override that the validate stage is guaranteed to reject.
    #[must_use]
    pub fn forced_rejection() -> Self {
        Self::new(REJECTED_VALIDATION)
    }
}
