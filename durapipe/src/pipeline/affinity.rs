//! Worker affinity resolution.

use tracing::{info, warn};

use super::OrchestrationContext;
use crate::checkpoint::CheckpointRecord;
use crate::errors::{OrchestrationError, StageError};
use crate::stages::{ExecutionChannel, StageName};

/// Picks the execution channel every later stage is pinned to.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerAffinity;

impl WorkerAffinity {
    /// Discovers a worker under the discovery budget.
    ///
    /// Discovery has no retry policy; any failure ends the run.
    pub async fn resolve(ctx: &mut OrchestrationContext) -> Result<ExecutionChannel, OrchestrationError> {
        let recorded = ctx.replay("channel_selected", |record| {
            matches!(record, CheckpointRecord::ChannelSelected { .. })
        })?;
        if let Some(CheckpointRecord::ChannelSelected { channel }) = recorded {
            return Ok(channel);
        }

        let budget = ctx.config().discovery_timeout();
        info!("Searching for available worker");
        let channel = match tokio::time::timeout(budget, ctx.worker().discover()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => {
                warn!(error = %err, "Worker discovery failed");
                return Err(OrchestrationError::WorkerDiscovery(err));
            }
            Err(_) => {
                warn!(budget_secs = budget.as_secs(), "Worker discovery timed out");
                return Err(OrchestrationError::WorkerDiscovery(StageError::TimedOut {
                    stage: StageName::Discover,
                    budget,
                }));
            }
        };

        info!(channel = %channel, "Matched orchestration to worker");
        ctx.record(CheckpointRecord::ChannelSelected {
            channel: channel.clone(),
        })
        .await?;
        Ok(channel)
    }
}
