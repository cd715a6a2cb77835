//! Lifecycle events and the sinks that receive them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, Level};

use crate::core::InstanceId;
use crate::stages::StageName;

/// One lifecycle event of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dotted event name, e.g. `stage.completed`.
    pub kind: String,
    /// The instance the event belongs to.
    pub instance_id: Option<InstanceId>,
    /// The stage the event concerns, if any.
    pub stage: Option<StageName>,
    /// Event-specific details.
    pub data: serde_json::Value,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event with no instance, stage or details.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            instance_id: None,
            stage: None,
            data: serde_json::Value::Null,
            emitted_at: Utc::now(),
        }
    }

    /// Attributes the event to an instance.
    #[must_use]
    pub fn for_instance(mut self, instance: InstanceId) -> Self {
        self.instance_id = Some(instance);
        self
    }

    /// Attributes the event to a stage.
    #[must_use]
    pub fn at_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches details.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Receiver of orchestration lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event without suspending. Must never panic.
    fn try_emit(&self, event: PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {}

    fn try_emit(&self, _event: PipelineEvent) {}
}

/// Writes events to `tracing` with the instance and stage as fields.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at `level`. Anything other than `DEBUG` logs at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let instance_id = event.instance_id.map(|id| id.to_string()).unwrap_or_default();
        let stage = event.stage.map(StageName::as_str).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event = %event.kind, instance_id = %instance_id, stage, data = %event.data, "Pipeline event");
        } else {
            info!(event = %event.kind, instance_id = %instance_id, stage, data = %event.data, "Pipeline event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event names in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.kind.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the events of one instance.
    #[must_use]
    pub fn events_for(&self, instance: InstanceId) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.instance_id == Some(instance))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}

/// Stamps events that carry no instance id with the instance it serves.
#[derive(Clone)]
pub struct InstanceEventSink {
    inner: Arc<dyn EventSink>,
    instance: InstanceId,
}

impl InstanceEventSink {
    /// Scopes `inner` to `instance`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventSink>, instance: InstanceId) -> Self {
        Self { inner, instance }
    }

    /// The instance events are attributed to.
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }

    fn scope(&self, mut event: PipelineEvent) -> PipelineEvent {
        event.instance_id.get_or_insert(self.instance);
        event
    }
}

impl std::fmt::Debug for InstanceEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceEventSink")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for InstanceEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.inner.emit(self.scope(event)).await;
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.inner.try_emit(self.scope(event));
    }
}
