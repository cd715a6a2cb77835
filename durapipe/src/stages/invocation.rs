//! Budgeted stage invocation.
//!
//! Each attempt runs under a start-to-close budget and, optionally, an idle
//! budget that is reset by every heartbeat. Across attempts the retry policy
//! and the overall schedule-to-close budget decide whether to try again.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Heartbeat, StageCall, StageOutput, StageWorker};
use crate::config::OrchestratorConfig;
use crate::errors::StageError;
use crate::events::{EventSink, PipelineEvent};
use crate::pipeline::{should_retry, RetryDecision, RetryPolicy, RetryState};

/// Budgets and retry policy for one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOptions {
    /// Time budget of a single attempt.
    pub start_to_close: Duration,
    /// Time budget across all attempts.
    pub schedule_to_close: Option<Duration>,
    /// Idle budget between heartbeats.
    pub heartbeat_timeout: Option<Duration>,
    /// Retry policy; `None` runs a single attempt.
    pub retry: Option<RetryPolicy>,
}

impl InvocationOptions {
    /// Options for the regular pipeline stages.
    #[must_use]
    pub fn stage(config: &OrchestratorConfig) -> Self {
        Self {
            start_to_close: config.stage_timeout(),
            schedule_to_close: None,
            heartbeat_timeout: Some(config.heartbeat_timeout()),
            retry: Some(config.stage_retry.clone()),
        }
    }

    /// Options for the completion poll.
    #[must_use]
    pub fn poll(config: &OrchestratorConfig) -> Self {
        Self {
            start_to_close: config.poll_timeout(),
            schedule_to_close: Some(config.poll_timeout()),
            heartbeat_timeout: Some(config.heartbeat_timeout()),
            retry: Some(config.poll_retry.clone()),
        }
    }
}

/// Successful invocation and the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    /// The stage output.
    pub output: StageOutput,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Invokes a stage under the given budgets and retry policy.
pub async fn invoke_stage(
    worker: &dyn StageWorker,
    call: StageCall,
    options: &InvocationOptions,
    events: &dyn EventSink,
) -> Result<InvocationReport, StageError> {
    let started = Instant::now();
    let mut state = RetryState::new();

    loop {
        let elapsed = started.elapsed();
        let budget = match options.schedule_to_close {
            Some(total) => options.start_to_close.min(total.saturating_sub(elapsed)),
            None => options.start_to_close,
        };

        let attempt_call = StageCall {
            attempt: state.next_attempt(),
            ..call.clone()
        };

        let error = match run_attempt(worker, attempt_call, budget, options.heartbeat_timeout).await {
            Ok(output) => {
                return Ok(InvocationReport {
                    output,
                    attempts: state.next_attempt(),
                })
            }
            Err(error) => error,
        };

        let Some(policy) = options.retry.as_ref() else {
            return Err(error);
        };
        if !error.is_retryable() {
            return Err(error);
        }

        match should_retry(&mut state, policy, started.elapsed(), options.schedule_to_close) {
            RetryDecision::Retry(delay) => {
                debug!(
                    stage = %call.stage,
                    attempt = state.failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying stage after error"
                );
                events.try_emit(
                    PipelineEvent::new("stage.retrying")
                        .at_stage(call.stage)
                        .with_data(serde_json::json!({
                            "attempt": state.failures,
                            "delay_ms": delay.as_millis() as u64,
                            "error": error.to_string(),
                        })),
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => {
                warn!(stage = %call.stage, attempts = state.failures, error = %error, "Stage retries exhausted");
                return Err(error);
            }
        }
    }
}

async fn run_attempt(
    worker: &dyn StageWorker,
    call: StageCall,
    budget: Duration,
    idle_budget: Option<Duration>,
) -> Result<StageOutput, StageError> {
    let stage = call.stage;
    let (heartbeat, mut monitor) = Heartbeat::channel();
    let deadline = Instant::now() + budget;

    let attempt = worker.invoke(call, heartbeat);
    tokio::pin!(attempt);

    let mut idle_deadline = idle_budget.map(|idle| Instant::now() + idle);

    loop {
        tokio::select! {
            result = &mut attempt => return result,
            beat = monitor.next_beat(), if monitor.is_open() => {
                // Only a real beat restarts the idle budget; a dropped handle does not.
                if beat {
                    idle_deadline = idle_budget.map(|idle| Instant::now() + idle);
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                return Err(StageError::TimedOut { stage, budget });
            }
            () = sleep_until_optional(idle_deadline) => {
                return Err(StageError::HeartbeatTimeout {
                    stage,
                    idle: idle_budget.unwrap_or_default(),
                });
            }
        }
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineRequest;
    use crate::events::CollectingEventSink;
    use crate::stages::{MockStageWorker, StageName};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn call(stage: StageName) -> StageCall {
        StageCall::new(stage, PipelineRequest::new("a.csv", "green"), None, "test")
    }

    fn options() -> InvocationOptions {
        InvocationOptions {
            start_to_close: Duration::from_secs(300),
            schedule_to_close: None,
            heartbeat_timeout: Some(Duration::from_secs(20)),
            retry: Some(RetryPolicy::new().with_maximum_attempts(3)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let mut worker = MockStageWorker::new();
        worker
            .expect_invoke()
            .times(1)
            .returning(|call, _| {
                assert_eq!(call.attempt, 1);
                Ok(StageOutput::Payload("extracted".into()))
            });

        let sink = CollectingEventSink::new();
        let report = invoke_stage(&worker, call(StageName::Extract), &options(), &sink)
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.output, StageOutput::Payload("extracted".into()));
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut worker = MockStageWorker::new();
        worker.expect_invoke().returning(move |call, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(call.attempt, n);
            if n < 3 {
                Err(StageError::retryable(StageName::Transform, "flaky"))
            } else {
                Ok(StageOutput::Payload("transformed".into()))
            }
        });

        let sink = CollectingEventSink::new();
        let report = invoke_stage(&worker, call(StageName::Transform), &options(), &sink)
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.events_of_type("stage.retrying").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let mut worker = MockStageWorker::new();
        worker
            .expect_invoke()
            .times(1)
            .returning(|_, _| Err(StageError::fatal(StageName::Load, "schema mismatch")));

        let sink = CollectingEventSink::new();
        let err = invoke_stage(&worker, call(StageName::Load), &options(), &sink)
            .await
            .unwrap_err();

        assert_eq!(err, StageError::fatal(StageName::Load, "schema mismatch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted_returns_last_error() {
        let mut worker = MockStageWorker::new();
        worker
            .expect_invoke()
            .times(3)
            .returning(|_, _| Err(StageError::retryable(StageName::Extract, "unavailable")));

        let sink = CollectingEventSink::new();
        let err = invoke_stage(&worker, call(StageName::Extract), &options(), &sink)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[derive(Debug)]
    struct StallingWorker {
        heartbeat_every: Option<Duration>,
        work: Duration,
    }

    #[async_trait::async_trait]
    impl StageWorker for StallingWorker {
        async fn discover(&self) -> Result<crate::stages::ExecutionChannel, StageError> {
            Ok(crate::stages::ExecutionChannel::new("worker"))
        }

        async fn invoke(&self, _call: StageCall, heartbeat: Heartbeat) -> Result<StageOutput, StageError> {
            let started = Instant::now();
            while started.elapsed() < self.work {
                match self.heartbeat_every {
                    Some(every) => {
                        tokio::time::sleep(every).await;
                        heartbeat.beat();
                    }
                    None => tokio::time::sleep(self.work).await,
                }
            }
            Ok(StageOutput::Payload("done".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stage_hits_idle_budget() {
        let worker = StallingWorker {
            heartbeat_every: None,
            work: Duration::from_secs(60),
        };
        let single = InvocationOptions {
            retry: None,
            ..options()
        };

        let err = invoke_stage(&worker, call(StageName::Extract), &single, &CollectingEventSink::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StageError::HeartbeatTimeout {
                stage: StageName::Extract,
                idle: Duration::from_secs(20),
            }
        );
    }

    #[derive(Debug)]
    struct DroppingWorker;

    #[async_trait::async_trait]
    impl StageWorker for DroppingWorker {
        async fn discover(&self) -> Result<crate::stages::ExecutionChannel, StageError> {
            Ok(crate::stages::ExecutionChannel::new("worker"))
        }

        async fn invoke(&self, _call: StageCall, heartbeat: Heartbeat) -> Result<StageOutput, StageError> {
            tokio::time::sleep(Duration::from_secs(19)).await;
            drop(heartbeat);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_heartbeat_does_not_extend_idle_budget() {
        let single = InvocationOptions {
            retry: None,
            ..options()
        };

        let started = Instant::now();
        let err = invoke_stage(&DroppingWorker, call(StageName::Extract), &single, &CollectingEventSink::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StageError::HeartbeatTimeout {
                stage: StageName::Extract,
                idle: Duration::from_secs(20),
            }
        );
        assert!(started.elapsed() <= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_long_stage_alive() {
        let worker = StallingWorker {
            heartbeat_every: Some(Duration::from_secs(5)),
            work: Duration::from_secs(60),
        };

        let report = invoke_stage(&worker, call(StageName::Load), &options(), &CollectingEventSink::new())
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_to_close_budget() {
        let worker = StallingWorker {
            heartbeat_every: Some(Duration::from_secs(5)),
            work: Duration::from_secs(600),
        };
        let single = InvocationOptions {
            retry: None,
            ..options()
        };

        let err = invoke_stage(&worker, call(StageName::Transform), &single, &CollectingEventSink::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StageError::TimedOut {
                stage: StageName::Transform,
                budget: Duration::from_secs(300),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_to_close_bounds_unlimited_retries() {
        let mut worker = MockStageWorker::new();
        worker
            .expect_invoke()
            .returning(|_, _| Err(StageError::retryable(StageName::Poll, "job still running")));

        let poll = InvocationOptions {
            start_to_close: Duration::from_secs(3000),
            schedule_to_close: Some(Duration::from_secs(30)),
            heartbeat_timeout: Some(Duration::from_secs(20)),
            retry: Some(RetryPolicy::constant(2000)),
        };

        let started = Instant::now();
        let err = invoke_stage(&worker, call(StageName::Poll), &poll, &CollectingEventSink::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(started.elapsed() >= Duration::from_secs(26));
    }
}
