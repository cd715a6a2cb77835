//! Scripted stage worker.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::checkpoint::fingerprint;
use crate::core::REJECTED_VALIDATION;
use crate::errors::StageError;
use crate::stages::{ExecutionChannel, Heartbeat, StageCall, StageName, StageOutput, StageWorker};

/// Channel returned by discovery unless overridden.
pub const DEFAULT_CHANNEL: &str = "data-pipeline-worker-1";

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    /// The invoked stage.
    pub stage: StageName,
    /// The channel the call was routed through.
    pub channel: Option<ExecutionChannel>,
    /// Fingerprint of the stage input.
    pub fingerprint: String,
    /// The validation value the stage saw.
    pub validation: String,
    /// Attempt number.
    pub attempt: u32,
    /// Declared orchestration type name.
    pub workflow_type: String,
}

/// An in-process worker whose behavior is scripted up front.
///
/// Validation rejects the value `"blue"` and accepts everything else. Loads
/// are idempotent: a dataset is stored once per input fingerprint no matter
/// how often it is loaded.
#[derive(Debug)]
pub struct ScriptedWorker {
    channel: ExecutionChannel,
    discovery_fails: bool,
    poll_failures: u32,
    stalled: HashSet<StageName>,
    stage_delay: Duration,
    invocations: Mutex<Vec<StageInvocation>>,
    discoveries: Mutex<u32>,
    polls_failed: Mutex<u32>,
    datasets: Mutex<BTreeMap<String, String>>,
}

impl Default for ScriptedWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedWorker {
    /// Creates a worker where every stage succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: ExecutionChannel::new(DEFAULT_CHANNEL),
            discovery_fails: false,
            poll_failures: 0,
            stalled: HashSet::new(),
            stage_delay: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            discoveries: Mutex::new(0),
            polls_failed: Mutex::new(0),
            datasets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sets the channel discovery returns.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = ExecutionChannel::new(channel);
        self
    }

    /// Makes discovery fail.
    #[must_use]
    pub fn fail_discovery(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    /// Makes the first `n` poll attempts fail with a retryable error.
    #[must_use]
    pub fn fail_polls(mut self, n: u32) -> Self {
        self.poll_failures = n;
        self
    }

    /// Makes a stage hang without ever sending a heartbeat.
    #[must_use]
    pub fn stall(mut self, stage: StageName) -> Self {
        self.stalled.insert(stage);
        self
    }

    /// Makes every stage take `delay`, heartbeating once per second.
    #[must_use]
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Returns every recorded invocation in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations.lock().clone()
    }

    /// Returns the recorded invocations of one stage.
    #[must_use]
    pub fn calls_for(&self, stage: StageName) -> Vec<StageInvocation> {
        self.invocations
            .lock()
            .iter()
            .filter(|call| call.stage == stage)
            .cloned()
            .collect()
    }

    /// Returns the recorded stage order.
    #[must_use]
    pub fn stage_order(&self) -> Vec<StageName> {
        self.invocations.lock().iter().map(|call| call.stage).collect()
    }

    /// Returns how often discovery ran.
    #[must_use]
    pub fn discoveries(&self) -> u32 {
        *self.discoveries.lock()
    }

    /// Returns the stored datasets keyed by input fingerprint.
    #[must_use]
    pub fn loaded_datasets(&self) -> BTreeMap<String, String> {
        self.datasets.lock().clone()
    }

    async fn work(&self, heartbeat: &Heartbeat) {
        let tick = Duration::from_secs(1);
        let mut remaining = self.stage_delay;
        while !remaining.is_zero() {
            let step = remaining.min(tick);
            tokio::time::sleep(step).await;
            heartbeat.beat();
            remaining -= step;
        }
    }

    fn output(&self, call: &StageCall, input: &str) -> Result<StageOutput, StageError> {
        let filename = &call.request.input_filename;
        match call.stage {
            StageName::Discover => Err(StageError::fatal(call.stage, "discovery is not a stage call")),
            StageName::Validate => Ok(StageOutput::Validation(
                call.request.validation != REJECTED_VALIDATION,
            )),
            StageName::Extract => Ok(StageOutput::Payload(format!("extracted {filename}"))),
            StageName::Transform => Ok(StageOutput::Payload(format!("transformed {filename}"))),
            StageName::Load => {
                let mut datasets = self.datasets.lock();
                let stored = datasets.contains_key(input);
                datasets
                    .entry(input.to_string())
                    .or_insert_with(|| filename.clone());
                if stored {
                    Ok(StageOutput::Payload(format!("{filename} already loaded")))
                } else {
                    Ok(StageOutput::Payload(format!("loaded {filename}")))
                }
            }
            StageName::Poll => {
                let mut failed = self.polls_failed.lock();
                if *failed < self.poll_failures {
                    *failed += 1;
                    Err(StageError::retryable(call.stage, "downstream job still running"))
                } else {
                    Ok(StageOutput::Payload(format!("{} complete", call.workflow_type)))
                }
            }
        }
    }
}

#[async_trait]
impl StageWorker for ScriptedWorker {
    async fn discover(&self) -> Result<ExecutionChannel, StageError> {
        *self.discoveries.lock() += 1;
        if self.discovery_fails {
            return Err(StageError::fatal(StageName::Discover, "no worker available"));
        }
        Ok(self.channel.clone())
    }

    async fn invoke(&self, call: StageCall, heartbeat: Heartbeat) -> Result<StageOutput, StageError> {
        let input = fingerprint(&call.request);
        self.invocations.lock().push(StageInvocation {
            stage: call.stage,
            channel: call.channel.clone(),
            fingerprint: input.clone(),
            validation: call.request.validation.clone(),
            attempt: call.attempt,
            workflow_type: call.workflow_type.clone(),
        });

        if self.stalled.contains(&call.stage) {
            std::future::pending::<()>().await;
        }
        self.work(&heartbeat).await;
        self.output(&call, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineRequest;

    fn call(stage: StageName, validation: &str) -> StageCall {
        StageCall::new(
            stage,
            PipelineRequest::new("orders.csv", validation),
            Some(ExecutionChannel::new(DEFAULT_CHANNEL)),
            "DataPipelineWorkflowHappyPath",
        )
    }

    #[tokio::test]
    async fn test_validation_rejects_forced_value() {
        let worker = ScriptedWorker::new();

        let accepted = worker.invoke(call(StageName::Validate, "green"), Heartbeat::detached()).await;
        let rejected = worker.invoke(call(StageName::Validate, "blue"), Heartbeat::detached()).await;

        assert_eq!(accepted.unwrap(), StageOutput::Validation(true));
        assert_eq!(rejected.unwrap(), StageOutput::Validation(false));
        assert_eq!(worker.calls_for(StageName::Validate).len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_load_is_idempotent() {
        let worker = ScriptedWorker::new();

        worker.invoke(call(StageName::Load, "green"), Heartbeat::detached()).await.unwrap();
        let second = worker
            .invoke(call(StageName::Load, "green"), Heartbeat::detached())
            .await
            .unwrap();

        assert_eq!(second, StageOutput::Payload("orders.csv already loaded".into()));
        assert_eq!(worker.loaded_datasets().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_failures_then_success() {
        let worker = ScriptedWorker::new().fail_polls(2);

        for _ in 0..2 {
            let err = worker
                .invoke(call(StageName::Poll, "green"), Heartbeat::detached())
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
        let output = worker
            .invoke(call(StageName::Poll, "green"), Heartbeat::detached())
            .await
            .unwrap();
        assert_eq!(output, StageOutput::Payload("DataPipelineWorkflowHappyPath complete".into()));
    }

    #[tokio::test]
    async fn test_discovery() {
        let worker = ScriptedWorker::new().with_channel("worker-7");
        assert_eq!(worker.discover().await.unwrap().as_str(), "worker-7");

        let failing = ScriptedWorker::new().fail_discovery();
        assert!(failing.discover().await.is_err());
        assert_eq!(failing.discoveries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_delay_heartbeats() {
        let worker = ScriptedWorker::new().with_stage_delay(Duration::from_secs(3));
        let heartbeat = Heartbeat::detached();

        worker.invoke(call(StageName::Extract, "green"), heartbeat.clone()).await.unwrap();

        assert_eq!(heartbeat.beats(), 3);
    }
}
