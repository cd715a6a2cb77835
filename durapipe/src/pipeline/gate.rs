//! Human-in-the-loop gate.

use std::time::Duration;
use tracing::{info, warn};

use super::OrchestrationContext;
use crate::checkpoint::CheckpointRecord;
use crate::core::ConfirmationKind;
use crate::errors::OrchestrationError;

/// Suspends a run until an external confirmation arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanGate {
    kind: ConfirmationKind,
    timeout: Duration,
}

impl HumanGate {
    /// Creates a gate on the given confirmation channel.
    #[must_use]
    pub const fn new(kind: ConfirmationKind, timeout: Duration) -> Self {
        Self { kind, timeout }
    }

    /// The awaited confirmation channel.
    #[must_use]
    pub const fn kind(&self) -> ConfirmationKind {
        self.kind
    }

    /// Waits for the confirmation flag.
    ///
    /// A confirmation delivered before the gate is reached opens it
    /// immediately. Timing out is fatal and never retried.
    pub async fn wait(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestrationError> {
        let kind = self.kind;
        let recorded = ctx.replay(&format!("confirmation_received({kind})"), |record| {
            matches!(record, CheckpointRecord::ConfirmationReceived { kind: k } if *k == kind)
        })?;
        if recorded.is_some() {
            return Ok(());
        }

        info!(confirmation = %kind, timeout_secs = self.timeout.as_secs(), "Waiting for load confirmation");
        let mut rx = ctx.state().subscribe();
        let confirmed = async move { rx.wait_for(|state| state.is_confirmed(kind)).await.is_ok() };

        match tokio::time::timeout(self.timeout, confirmed).await {
            Ok(true) => {
                info!(confirmation = %kind, "Load confirmation received");
                ctx.record(CheckpointRecord::ConfirmationReceived { kind }).await
            }
            Ok(false) => Err(OrchestrationError::cancelled("instance state closed")),
            Err(_) => {
                warn!(confirmation = %kind, "Load did not complete before timeout");
                Err(OrchestrationError::ConfirmationTimeout {
                    kind,
                    timeout: self.timeout,
                })
            }
        }
    }
}
