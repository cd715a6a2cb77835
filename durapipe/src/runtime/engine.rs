//! Orchestration engine.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::instance::{InstanceHandle, InstanceRecord, InstanceStatus};
use crate::checkpoint::{CheckpointEntry, CheckpointJournal, InMemoryCheckpointJournal};
use crate::config::OrchestratorConfig;
use crate::core::{ConfirmationKind, ExecutionState, InstanceId, PipelineRequest, TerminalResult};
use crate::errors::OrchestrationError;
use crate::events::{
    EventSink, InMemoryMetadataIndex, InstanceEventSink, MetadataIndex, MetadataTag, NoOpEventSink,
    PipelineEvent, STEP_KEY,
};
use crate::pipeline::{
    should_retry, ContextServices, OrchestrationContext, RetryDecision, RetryState, ScenarioVariant,
    StageSequencer,
};
use crate::stages::StageWorker;

/// Acknowledgment returned by [`OrchestrationEngine::update_load_complete`].
pub const UPDATE_ACKNOWLEDGMENT: &str = "Workflow update successful";

/// Runs orchestration instances and exposes their observation interface.
///
/// Each instance runs as its own task with a single logical thread of
/// control. Instances share no mutable state.
pub struct OrchestrationEngine {
    services: ContextServices,
    instances: DashMap<InstanceId, Arc<InstanceRecord>>,
}

impl OrchestrationEngine {
    /// Creates an engine with default configuration and in-memory storage.
    #[must_use]
    pub fn new(worker: Arc<dyn StageWorker>) -> Self {
        Self {
            services: ContextServices {
                config: Arc::new(OrchestratorConfig::default()),
                worker,
                journal: Arc::new(InMemoryCheckpointJournal::new()),
                metadata: Arc::new(InMemoryMetadataIndex::new()),
                events: Arc::new(NoOpEventSink),
            },
            instances: DashMap::new(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.services.config = Arc::new(config);
        self
    }

    /// Sets the checkpoint journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn CheckpointJournal>) -> Self {
        self.services.journal = journal;
        self
    }

    /// Sets the metadata index.
    #[must_use]
    pub fn with_metadata_index(mut self, metadata: Arc<dyn MetadataIndex>) -> Self {
        self.services.metadata = metadata;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.services.events = events;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.services.config
    }

    /// Starts a new orchestration instance.
    ///
    /// Unknown variant names and malformed requests are rejected before an
    /// instance exists. Must be called from within a Tokio runtime.
    pub fn start(&self, request: PipelineRequest, variant_name: &str) -> Result<InstanceHandle, OrchestrationError> {
        let variant = ScenarioVariant::resolve(variant_name)?;
        request.check()?;

        let id = InstanceId::new();
        let record = Arc::new(InstanceRecord::new(id, variant, request));
        let handle = record.handle();
        self.instances.insert(id, record.clone());

        let span = info_span!("orchestration", instance_id = %id, variant = %variant);
        tokio::spawn(drive(self.services.clone(), record).instrument(span));

        info!(instance_id = %id, variant = %variant, "Orchestration started");
        Ok(handle)
    }

    fn record(&self, id: InstanceId) -> Result<Arc<InstanceRecord>, OrchestrationError> {
        self.instances
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestrationError::InstanceNotFound { id })
    }

    fn open_record(&self, id: InstanceId) -> Result<Arc<InstanceRecord>, OrchestrationError> {
        let record = self.record(id)?;
        if record.is_closed() {
            return Err(OrchestrationError::InstanceClosed { id });
        }
        Ok(record)
    }

    /// Returns a handle on an existing instance.
    pub fn handle(&self, id: InstanceId) -> Result<InstanceHandle, OrchestrationError> {
        Ok(self.record(id)?.handle())
    }

    /// Waits for an instance's terminal result.
    pub async fn result(&self, id: InstanceId) -> Result<TerminalResult, OrchestrationError> {
        Ok(self.handle(id)?.result().await)
    }

    /// Returns the current progress percentage without blocking.
    pub fn progress(&self, id: InstanceId) -> Result<u8, OrchestrationError> {
        Ok(self.record(id)?.state.progress())
    }

    /// Returns a copy of the instance's execution state.
    pub fn snapshot(&self, id: InstanceId) -> Result<ExecutionState, OrchestrationError> {
        Ok(self.record(id)?.state.snapshot())
    }

    /// Returns the instance's lifecycle status.
    pub fn status(&self, id: InstanceId) -> Result<InstanceStatus, OrchestrationError> {
        Ok(self.record(id)?.status())
    }

    /// Fire-and-forget load-complete signal.
    pub fn signal_load_complete(&self, id: InstanceId, payload: &str) -> Result<(), OrchestrationError> {
        self.confirm(id, ConfirmationKind::Signal, payload)
    }

    /// Load-complete update; returns an acknowledgment once recorded.
    pub fn update_load_complete(&self, id: InstanceId, payload: &str) -> Result<String, OrchestrationError> {
        self.confirm(id, ConfirmationKind::Update, payload)?;
        Ok(UPDATE_ACKNOWLEDGMENT.to_string())
    }

    fn confirm(&self, id: InstanceId, kind: ConfirmationKind, payload: &str) -> Result<(), OrchestrationError> {
        let record = self.open_record(id)?;
        if !record.state.confirm(kind) {
            return Err(OrchestrationError::InstanceClosed { id });
        }
        info!(instance_id = %id, confirmation = %kind, payload = %payload, "Load confirmation delivered");
        Ok(())
    }

    /// Requests cancellation of a running instance.
    ///
    /// Returns false if the instance was already being cancelled.
    pub fn cancel(&self, id: InstanceId, reason: &str) -> Result<bool, OrchestrationError> {
        let record = self.open_record(id)?;
        let cancelled = record.cancellation.cancel(reason);
        if cancelled {
            info!(instance_id = %id, reason = %reason, "Cancellation requested");
        }
        Ok(cancelled)
    }

    /// Returns the instances whose current step tag equals `step`.
    #[must_use]
    pub fn search_by_step(&self, step: &str) -> Vec<InstanceId> {
        self.services.metadata.search(STEP_KEY, step)
    }

    /// Returns every tag an instance published, in order.
    pub fn tags(&self, id: InstanceId) -> Result<Vec<MetadataTag>, OrchestrationError> {
        self.record(id)?;
        Ok(self.services.metadata.history(id))
    }

    /// Returns an instance's checkpoint history.
    pub async fn journal(&self, id: InstanceId) -> Result<Vec<CheckpointEntry>, OrchestrationError> {
        self.record(id)?;
        self.services.journal.load(id).await
    }

    /// Drops a finished instance with its journal and published tags.
    ///
    /// Running instances are refused with [`OrchestrationError::InstanceRunning`].
    pub async fn forget(&self, id: InstanceId) -> Result<(), OrchestrationError> {
        let record = self.record(id)?;
        if !record.status().is_terminal() {
            return Err(OrchestrationError::InstanceRunning { id });
        }

        self.instances.remove(&id);
        self.services.journal.clear(id).await?;
        self.services.metadata.remove(id).await;
        debug!(instance_id = %id, "Orchestration instance forgotten");
        Ok(())
    }

    /// Returns the ids of every known instance.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.instances.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.services.config)
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Host loop of one instance: runs the sequence, replays it after
/// replayable failures and publishes the terminal result.
async fn drive(services: ContextServices, record: Arc<InstanceRecord>) {
    let id = record.id;
    let replay = services.config.replay.as_retry_policy();
    let mut replays = RetryState::new();
    let events = InstanceEventSink::new(services.events.clone(), id);

    events
        .emit(PipelineEvent::new("pipeline.started").with_data(serde_json::json!({
            "variant": record.variant.type_name(),
            "input_filename": record.request.input_filename,
        })))
        .await;

    let result = loop {
        let outcome = tokio::select! {
            outcome = run_once(&services, &record) => outcome,
            () = record.cancellation.cancelled() => Err(cancellation_error(&record)),
        };

        let err = match outcome {
            Ok(result) => break result,
            Err(err) => err,
        };
        if !err.is_replayable() {
            break TerminalResult::from_error(&err);
        }

        match should_retry(&mut replays, &replay, Duration::ZERO, None) {
            RetryDecision::Retry(delay) => {
                warn!(
                    execution = replays.failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Orchestration run failed, replaying from journal"
                );
                events
                    .emit(PipelineEvent::new("pipeline.replaying").with_data(serde_json::json!({
                        "execution": replays.failures,
                        "error": err.to_string(),
                    })))
                    .await;
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = record.cancellation.cancelled() => {
                        break TerminalResult::from_error(&cancellation_error(&record));
                    }
                }
            }
            RetryDecision::GiveUp => {
                error!(executions = replays.failures, error = %err, "Orchestration replays exhausted");
                break TerminalResult::from_error(&err);
            }
        }
    };

    let progress = record.state.progress();
    let status = record.finish(result.clone());
    match &result {
        TerminalResult::Failed { cause, retryable } => {
            warn!(status = %status, progress, cause = %cause, "Orchestration failed");
            events
                .emit(PipelineEvent::new("pipeline.failed").with_data(serde_json::json!({
                    "status": status,
                    "progress": progress,
                    "cause": cause,
                    "retryable": retryable,
                })))
                .await;
        }
        _ => {
            info!(status = %status, progress, result = %result, "Orchestration finished");
            events
                .emit(PipelineEvent::new("pipeline.completed").with_data(serde_json::json!({
                    "status": status,
                    "progress": progress,
                    "result": result,
                })))
                .await;
        }
    }
}

async fn run_once(services: &ContextServices, record: &InstanceRecord) -> Result<TerminalResult, OrchestrationError> {
    let mut ctx = OrchestrationContext::open(
        services.clone(),
        record.id,
        record.variant,
        record.request.clone(),
        record.state.clone(),
    )
    .await?;
    debug!(replaying = ctx.is_replaying(), "Orchestration run starting");
    StageSequencer::new(record.variant).run(&mut ctx).await
}

fn cancellation_error(record: &InstanceRecord) -> OrchestrationError {
    OrchestrationError::cancelled(record.cancellation.reason().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWorker;

    fn engine() -> OrchestrationEngine {
        OrchestrationEngine::new(Arc::new(ScriptedWorker::new()))
    }

    #[tokio::test]
    async fn test_unknown_variant_rejected_before_start() {
        let engine = engine();
        let err = engine
            .start(PipelineRequest::new("a.csv", "green"), "NoSuchWorkflow")
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::UnknownVariant { .. }));
        assert!(engine.instances().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_rejected_before_start() {
        let engine = engine();
        let err = engine
            .start(PipelineRequest::new("", "green"), "DataPipelineWorkflowHappyPath")
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::MalformedRequest { .. }));
        assert!(engine.instances().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let engine = engine();
        let id = InstanceId::new();

        assert!(matches!(
            engine.progress(id),
            Err(OrchestrationError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            engine.signal_load_complete(id, "done"),
            Err(OrchestrationError::InstanceNotFound { .. })
        ));
        assert!(engine.result(id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_is_registered_while_running() {
        let engine = engine();
        let handle = engine
            .start(PipelineRequest::new("a.csv", "green"), "DataPipelineWorkflowHappyPath")
            .unwrap();

        assert_eq!(engine.instances(), vec![handle.id()]);
        assert_eq!(engine.status(handle.id()).unwrap(), InstanceStatus::Running);
        assert_eq!(engine.progress(handle.id()).unwrap(), 0);

        let result = handle.result().await;
        assert!(result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_releases_finished_instance() {
        let journal = Arc::new(InMemoryCheckpointJournal::new());
        let engine = engine().with_journal(journal.clone());
        let handle = engine
            .start(PipelineRequest::new("a.csv", "green"), "DataPipelineAdvancedVisibility")
            .unwrap();
        let id = handle.id();

        assert!(matches!(
            engine.forget(id).await,
            Err(OrchestrationError::InstanceRunning { .. })
        ));

        assert!(handle.result().await.is_success());
        assert!(journal.len(id) > 0);
        assert_eq!(engine.search_by_step("complete"), vec![id]);

        engine.forget(id).await.unwrap();

        assert!(engine.instances().is_empty());
        assert_eq!(journal.len(id), 0);
        assert!(engine.search_by_step("complete").is_empty());
        assert!(matches!(
            engine.forget(id).await,
            Err(OrchestrationError::InstanceNotFound { .. })
        ));
    }
}
