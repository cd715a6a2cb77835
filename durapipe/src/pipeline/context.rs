//! Per-run orchestration context.
//!
//! Every effect the sequencer performs goes through this context, so that a
//! re-executed run reads recorded results from the journal instead of
//! repeating them.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checkpoint::{fingerprint, CheckpointJournal, CheckpointRecord, ReplayCursor};
use crate::config::OrchestratorConfig;
use crate::core::{Checkpoint, InstanceId, PipelineRequest, StateCell};
use crate::errors::OrchestrationError;
use crate::events::{EventSink, InstanceEventSink, MetadataIndex, PipelineEvent};
use crate::stages::{invoke_stage, ExecutionChannel, InvocationOptions, StageCall, StageName, StageOutput, StageWorker};

use super::ScenarioVariant;

/// Collaborators shared by every run of one engine.
#[derive(Clone)]
pub struct ContextServices {
    /// Engine configuration.
    pub config: Arc<OrchestratorConfig>,
    /// The stage worker.
    pub worker: Arc<dyn StageWorker>,
    /// Durable history.
    pub journal: Arc<dyn CheckpointJournal>,
    /// Searchable metadata.
    pub metadata: Arc<dyn MetadataIndex>,
    /// Lifecycle event sink.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ContextServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Execution context of one run of one orchestration instance.
pub struct OrchestrationContext {
    instance: InstanceId,
    variant: ScenarioVariant,
    request: PipelineRequest,
    state: Arc<StateCell>,
    services: ContextServices,
    cursor: ReplayCursor,
}

impl OrchestrationContext {
    /// Opens a context, loading the instance's journal for replay.
    pub async fn open(
        services: ContextServices,
        instance: InstanceId,
        variant: ScenarioVariant,
        request: PipelineRequest,
        state: Arc<StateCell>,
    ) -> Result<Self, OrchestrationError> {
        let history = services.journal.load(instance).await?;
        if !history.is_empty() {
            info!(entries = history.len(), "Replaying orchestration from journal");
        }
        Ok(Self {
            instance,
            variant,
            request,
            state,
            services,
            cursor: ReplayCursor::new(history),
        })
    }

    /// The instance this context runs.
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The active variant.
    #[must_use]
    pub const fn variant(&self) -> ScenarioVariant {
        self.variant
    }

    /// The caller's request, exactly as submitted.
    #[must_use]
    pub const fn request(&self) -> &PipelineRequest {
        &self.request
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.services.config
    }

    /// The instance state.
    #[must_use]
    pub fn state(&self) -> &StateCell {
        &self.state
    }

    /// The stage worker.
    #[must_use]
    pub fn worker(&self) -> &dyn StageWorker {
        self.services.worker.as_ref()
    }

    /// Returns true while recorded history remains to be consumed.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.cursor.is_replaying()
    }

    /// Moves progress forward to a checkpoint.
    pub fn advance(&self, checkpoint: Checkpoint) {
        if self.state.advance(checkpoint) {
            debug!(progress = checkpoint.percent(), "Progress advanced");
        }
    }

    /// Consumes the next recorded entry if it matches the attempted operation.
    pub(crate) fn replay(
        &mut self,
        expected: &str,
        matches: impl FnOnce(&CheckpointRecord) -> bool,
    ) -> Result<Option<CheckpointRecord>, OrchestrationError> {
        self.cursor.next_matching(expected, matches)
    }

    /// Durably records a live effect.
    pub(crate) async fn record(&self, record: CheckpointRecord) -> Result<(), OrchestrationError> {
        self.services.journal.append(self.instance, record).await?;
        Ok(())
    }

    /// Runs a stage, or returns its recorded output when replaying.
    pub async fn execute_stage(
        &mut self,
        stage: StageName,
        request: &PipelineRequest,
        channel: Option<&ExecutionChannel>,
        options: &InvocationOptions,
    ) -> Result<StageOutput, OrchestrationError> {
        let input = fingerprint(request);
        let expected = format!("stage_completed({stage}, {input})");
        let recorded = self.replay(&expected, |record| {
            matches!(
                record,
                CheckpointRecord::StageCompleted { stage: s, fingerprint: f, .. }
                    if *s == stage && *f == input
            )
        })?;
        if let Some(CheckpointRecord::StageCompleted { output, .. }) = recorded {
            debug!(stage = %stage, "Stage result replayed from journal");
            return Ok(output);
        }

        let call = StageCall::new(stage, request.clone(), channel.cloned(), self.variant.type_name());
        let events = InstanceEventSink::new(self.services.events.clone(), self.instance);
        events
            .emit(
                PipelineEvent::new("stage.started")
                    .at_stage(stage)
                    .with_data(serde_json::json!({ "channel": channel })),
            )
            .await;

        match invoke_stage(self.worker(), call, options, &events).await {
            Ok(report) => {
                info!(stage = %stage, attempts = report.attempts, output = %report.output, "Stage completed");
                self.record(CheckpointRecord::StageCompleted {
                    stage,
                    fingerprint: input,
                    output: report.output.clone(),
                    attempts: report.attempts,
                })
                .await?;
                events
                    .emit(
                        PipelineEvent::new("stage.completed")
                            .at_stage(stage)
                            .with_data(serde_json::json!({ "attempts": report.attempts })),
                    )
                    .await;
                Ok(report.output)
            }
            Err(err) => {
                warn!(stage = %stage, error = %err, "Stage failed");
                events
                    .emit(
                        PipelineEvent::new("stage.failed")
                            .at_stage(stage)
                            .with_data(serde_json::json!({
                                "error": err.to_string(),
                                "retryable": err.is_retryable(),
                            })),
                    )
                    .await;
                Err(err.into())
            }
        }
    }

    /// Durable sleep; skipped when the timer already fired in a previous run.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), OrchestrationError> {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let expected = format!("timer_fired({duration_ms}ms)");
        let recorded = self.replay(&expected, |record| {
            matches!(record, CheckpointRecord::TimerFired { duration_ms: d } if *d == duration_ms)
        })?;
        if recorded.is_some() {
            return Ok(());
        }

        tokio::time::sleep(duration).await;
        self.record(CheckpointRecord::TimerFired { duration_ms }).await
    }

    /// Publishes an indexed metadata tag once per instance.
    pub async fn tag(&mut self, key: &str, value: &str) -> Result<(), OrchestrationError> {
        let expected = format!("metadata_tagged({key}={value})");
        let recorded = self.replay(&expected, |record| {
            matches!(record, CheckpointRecord::MetadataTagged { key: k, value: v } if k == key && v == value)
        })?;
        if recorded.is_some() {
            return Ok(());
        }

        self.services.metadata.upsert(self.instance, key, value).await;
        info!(key = %key, value = %value, "Metadata tag published");
        self.record(CheckpointRecord::MetadataTagged {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("instance", &self.instance)
            .field("variant", &self.variant)
            .field("progress", &self.state.progress())
            .field("replaying", &self.is_replaying())
            .finish()
    }
}
