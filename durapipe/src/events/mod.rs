//! Event emission and indexed metadata.
//!
//! Lifecycle events (`pipeline.*`, `stage.*`) go to an [`EventSink`];
//! searchable per-instance tags go to a [`MetadataIndex`].

mod sink;
mod visibility;

pub use sink::{
    CollectingEventSink, EventSink, InstanceEventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
};
pub use visibility::{InMemoryMetadataIndex, MetadataIndex, MetadataTag, STEP_KEY};
