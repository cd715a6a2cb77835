//! The fixed five-stage pipeline sequence.

use tracing::info;

use super::{
    CompletionStep, HumanGate, Milestone, OrchestrationContext, RejectionPolicy, ScenarioStrategy,
    ScenarioVariant, StageDirective, WorkerAffinity,
};
use crate::core::{Checkpoint, PipelineRequest, TerminalResult};
use crate::errors::{OrchestrationError, StageError, ValidationRejected};
use crate::events::STEP_KEY;
use crate::stages::{ExecutionChannel, InvocationOptions, StageName};

/// Stages pinned to the worker channel, with the milestone published before
/// each and the checkpoint reached after it.
const PINNED_STAGES: [(StageName, Milestone, Checkpoint); 3] = [
    (StageName::Extract, Milestone::Extract, Checkpoint::Extracted),
    (StageName::Transform, Milestone::Transform, Checkpoint::Transformed),
    (StageName::Load, Milestone::Load, Checkpoint::Loaded),
];

/// Drives discovery, validate, extract, transform, load and completion.
#[derive(Debug, Clone, Copy)]
pub struct StageSequencer {
    strategy: &'static dyn ScenarioStrategy,
}

impl StageSequencer {
    /// Creates the sequencer for a variant.
    #[must_use]
    pub fn new(variant: ScenarioVariant) -> Self {
        Self {
            strategy: variant.strategy(),
        }
    }

    /// Runs the sequence to a terminal result.
    ///
    /// `Err` is returned for failures; the caller decides whether a failure is
    /// replayed or becomes the terminal `Failed` result.
    pub async fn run(&self, ctx: &mut OrchestrationContext) -> Result<TerminalResult, OrchestrationError> {
        let channel = WorkerAffinity::resolve(ctx).await?;
        ctx.advance(Checkpoint::WorkerSelected);

        let settle = ctx.config().quiescence_delay();
        ctx.sleep(settle).await?;

        self.publish(ctx, Milestone::Validation).await?;
        let request = ctx
            .request()
            .with_override(self.strategy.validation_override().as_ref());
        let options = InvocationOptions::stage(ctx.config());

        let verdict = ctx
            .execute_stage(StageName::Validate, &request, None, &options)
            .await?;
        ctx.advance(Checkpoint::Validated);

        let accepted = verdict.as_validation().ok_or_else(|| {
            StageError::fatal(StageName::Validate, format!("expected a verdict, got '{verdict}'"))
        })?;
        if !accepted {
            info!(input_filename = %request.input_filename, "Validation rejected");
            return match self.strategy.rejection_policy() {
                RejectionPolicy::Soft => Ok(TerminalResult::Invalidated),
                RejectionPolicy::Escalate => Err(OrchestrationError::ValidationFailed {
                    source: ValidationRejected::new(&request.input_filename),
                }),
            };
        }

        for (stage, milestone, checkpoint) in PINNED_STAGES {
            self.publish(ctx, milestone).await?;
            ctx.execute_stage(stage, &request, Some(&channel), &options)
                .await?;

            match self.strategy.after_stage(stage) {
                StageDirective::Continue => {}
                StageDirective::Repeat => {
                    ctx.execute_stage(stage, &request, Some(&channel), &options)
                        .await?;
                }
                StageDirective::RaiseDefect(message) => {
                    return Err(OrchestrationError::defect(message));
                }
            }
            ctx.advance(checkpoint);
        }

        self.complete(ctx, &request, &channel).await?;

        self.publish(ctx, Milestone::Complete).await?;
        ctx.advance(Checkpoint::Completed);
        Ok(TerminalResult::processed(&ctx.request().input_filename))
    }

    async fn complete(
        &self,
        ctx: &mut OrchestrationContext,
        request: &PipelineRequest,
        channel: &ExecutionChannel,
    ) -> Result<(), OrchestrationError> {
        match self.strategy.completion_step() {
            CompletionStep::Poll => {
                let options = InvocationOptions::poll(ctx.config());
                ctx.execute_stage(StageName::Poll, request, Some(channel), &options)
                    .await?;
            }
            CompletionStep::AwaitConfirmation(kind) => {
                let timeout = ctx.config().confirmation_timeout();
                HumanGate::new(kind, timeout).wait(ctx).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, ctx: &mut OrchestrationContext, milestone: Milestone) -> Result<(), OrchestrationError> {
        match self.strategy.milestone_tag(milestone) {
            Some(value) => ctx.tag(STEP_KEY, value).await,
            None => Ok(()),
        }
    }
}
