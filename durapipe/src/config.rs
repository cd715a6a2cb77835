//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::RetryPolicy;

/// Budgets and retry policies of one orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget of the worker discovery call in seconds.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    /// Settle period between discovery and validation in seconds.
    #[serde(default = "default_quiescence_delay")]
    pub quiescence_delay_secs: u64,
    /// Start-to-close budget of a regular stage attempt in seconds.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Idle budget between heartbeats in seconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Overall budget of the completion poll in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// How long the human-in-the-loop gate waits in seconds.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// Retry policy of the regular stages.
    #[serde(default)]
    pub stage_retry: RetryPolicy,
    /// Retry policy of the completion poll.
    #[serde(default = "default_poll_retry")]
    pub poll_retry: RetryPolicy,
    /// How the host re-executes runs that hit a defect.
    #[serde(default)]
    pub replay: ReplayPolicy,
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_quiescence_delay() -> u64 {
    2
}

fn default_stage_timeout() -> u64 {
    300
}

fn default_heartbeat_timeout() -> u64 {
    20
}

fn default_poll_timeout() -> u64 {
    3000
}

fn default_confirmation_timeout() -> u64 {
    60
}

fn default_poll_retry() -> RetryPolicy {
    RetryPolicy::constant(2000)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout(),
            quiescence_delay_secs: default_quiescence_delay(),
            stage_timeout_secs: default_stage_timeout(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            poll_timeout_secs: default_poll_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            stage_retry: RetryPolicy::default(),
            poll_retry: default_poll_retry(),
            replay: ReplayPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks that the budgets are coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::invalid("stage_timeout_secs", "must be positive"));
        }
        if self.heartbeat_timeout_secs > self.stage_timeout_secs {
            return Err(ConfigError::invalid(
                "heartbeat_timeout_secs",
                format!(
                    "{}s exceeds the {}s stage budget",
                    self.heartbeat_timeout_secs, self.stage_timeout_secs
                ),
            ));
        }
        for (field, policy) in [("stage_retry", &self.stage_retry), ("poll_retry", &self.poll_retry)] {
            if policy.backoff_coefficient < 1.0 {
                return Err(ConfigError::invalid(field, "backoff_coefficient must be at least 1.0"));
            }
            if policy.initial_interval_ms == 0 {
                return Err(ConfigError::invalid(field, "initial_interval_ms must be positive"));
            }
        }
        if self.replay.max_attempts == 0 {
            return Err(ConfigError::invalid("replay", "max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Sets the confirmation timeout.
    #[must_use]
    pub fn with_confirmation_timeout_secs(mut self, secs: u64) -> Self {
        self.confirmation_timeout_secs = secs;
        self
    }

    /// Sets the replay policy.
    #[must_use]
    pub fn with_replay(mut self, replay: ReplayPolicy) -> Self {
        self.replay = replay;
        self
    }

    /// Discovery budget.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Quiescence delay.
    #[must_use]
    pub fn quiescence_delay(&self) -> Duration {
        Duration::from_secs(self.quiescence_delay_secs)
    }

    /// Regular stage budget.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Heartbeat idle budget.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Completion poll budget.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Human-in-the-loop gate timeout.
    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Re-execution policy for runs that fail with a replayable defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPolicy {
    /// Total executions of one run, including the first.
    #[serde(default = "default_replay_attempts")]
    pub max_attempts: u32,
    /// Delay before each re-execution in milliseconds.
    #[serde(default = "default_replay_delay")]
    pub delay_ms: u64,
}

fn default_replay_attempts() -> u32 {
    5
}

fn default_replay_delay() -> u64 {
    1000
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_replay_attempts(),
            delay_ms: default_replay_delay(),
        }
    }
}

impl ReplayPolicy {
    /// Creates a replay policy.
    #[must_use]
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self { max_attempts, delay_ms }
    }

    /// Expresses the policy as a constant-interval retry policy.
    #[must_use]
    pub fn as_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::constant(self.delay_ms).with_maximum_attempts(self.max_attempts)
    }
}
