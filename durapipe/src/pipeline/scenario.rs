//! Scenario variants and the behavioral deltas they layer onto the base
//! sequence.
//!
//! A variant is resolved once from the declared orchestration type name.
//! Each variant is backed by a [`ScenarioStrategy`] whose hooks the
//! [`StageSequencer`](super::StageSequencer) consults at fixed points; a hook
//! left at its default leaves the base sequence untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{ConfirmationKind, ValidationOverride};
use crate::errors::OrchestrationError;
use crate::stages::StageName;

/// The closed set of behavioral variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioVariant {
    /// Base sequence; a rejected validation is a soft outcome.
    Happy,
    /// A defect is raised after transform and the run is replayed.
    RecoverableBug,
    /// Validation is forced to reject and the rejection escalates.
    NonRecoverableFailure,
    /// The completion poll is replaced by a signal gate.
    HumanSignal,
    /// The completion poll is replaced by an update gate.
    HumanUpdate,
    /// Step tags are published for external search.
    AdvancedVisibility,
    /// Load runs twice with identical input.
    Idempotency,
}

impl ScenarioVariant {
    /// Every variant.
    pub const ALL: [Self; 7] = [
        Self::Happy,
        Self::RecoverableBug,
        Self::NonRecoverableFailure,
        Self::HumanSignal,
        Self::HumanUpdate,
        Self::AdvancedVisibility,
        Self::Idempotency,
    ];

    /// Returns the declared orchestration type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Happy => "DataPipelineWorkflowHappyPath",
            Self::RecoverableBug => "DataPipelineRecoverableFailure",
            Self::NonRecoverableFailure => "DataPipelineNonRecoverableFailure",
            Self::HumanSignal => "DataPipelineHumanInLoopSignal",
            Self::HumanUpdate => "DataPipelineHumanInLoopUpdate",
            Self::AdvancedVisibility => "DataPipelineAdvancedVisibility",
            Self::Idempotency => "DataPipelineIdempotency",
        }
    }

    /// Maps a declared type name to its variant.
    pub fn resolve(type_name: &str) -> Result<Self, OrchestrationError> {
        if type_name == "DataPipelineWorkflowNonRecoverableFailure" {
            return Ok(Self::NonRecoverableFailure);
        }
        Self::ALL
            .into_iter()
            .find(|variant| variant.type_name() == type_name)
            .ok_or_else(|| OrchestrationError::UnknownVariant {
                name: type_name.to_string(),
            })
    }

    /// Returns the strategy implementing this variant.
    #[must_use]
    pub fn strategy(self) -> &'static dyn ScenarioStrategy {
        match self {
            Self::Happy => &HAPPY_PATH,
            Self::RecoverableBug => &INJECTED_DEFECT,
            Self::NonRecoverableFailure => &FORCED_REJECTION,
            Self::HumanSignal => &SIGNAL_GATE,
            Self::HumanUpdate => &UPDATE_GATE,
            Self::AdvancedVisibility => &STEP_VISIBILITY,
            Self::Idempotency => &REPEATED_LOAD,
        }
    }
}

impl FromStr for ScenarioVariant {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl fmt::Display for ScenarioVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Points in the sequence where a step tag may be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    /// Before validate.
    Validation,
    /// Before extract.
    Extract,
    /// Before transform.
    Transform,
    /// Before load.
    Load,
    /// After completion.
    Complete,
}

impl Milestone {
    /// Returns the tag value of this milestone.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Complete => "complete",
        }
    }
}

/// What a rejected validation turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Terminal `Invalidated` result.
    Soft,
    /// Non-retryable validation failure.
    Escalate,
}

/// What happens right after a stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDirective {
    /// Proceed to the next checkpoint.
    Continue,
    /// Invoke the same stage again with identical input.
    Repeat,
    /// Fail the run with a defect carrying this message.
    RaiseDefect(&'static str),
}

/// The step that closes the sequence after load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    /// Poll for downstream completion with constant-interval retry.
    Poll,
    /// Wait on the human-in-the-loop gate.
    AwaitConfirmation(ConfirmationKind),
}

/// Behavioral deltas of one variant.
pub trait ScenarioStrategy: Send + Sync + fmt::Debug {
    /// Override applied to the request before validation.
    fn validation_override(&self) -> Option<ValidationOverride> {
        None
    }

    /// How a rejected validation is surfaced.
    fn rejection_policy(&self) -> RejectionPolicy {
        RejectionPolicy::Escalate
    }

    /// Tag value published at a milestone, if any.
    fn milestone_tag(&self, _milestone: Milestone) -> Option<&'static str> {
        None
    }

    /// Directive applied once `stage` has completed.
    fn after_stage(&self, _stage: StageName) -> StageDirective {
        StageDirective::Continue
    }

    /// The step run after load.
    fn completion_step(&self) -> CompletionStep {
        CompletionStep::Poll
    }
}

#[derive(Debug)]
struct HappyPath;

impl ScenarioStrategy for HappyPath {
    fn rejection_policy(&self) -> RejectionPolicy {
        RejectionPolicy::Soft
    }
}

#[derive(Debug)]
struct InjectedDefect;

impl ScenarioStrategy for InjectedDefect {
    fn after_stage(&self, stage: StageName) -> StageDirective {
        match stage {
            StageName::Transform => StageDirective::RaiseDefect("Workflow bug!"),
            _ => StageDirective::Continue,
        }
    }
}

#[derive(Debug)]
struct ForcedRejection;

impl ScenarioStrategy for ForcedRejection {
    fn validation_override(&self) -> Option<ValidationOverride> {
        Some(ValidationOverride::forced_rejection())
    }
}

#[derive(Debug)]
struct ConfirmationGate {
    kind: ConfirmationKind,
}

impl ScenarioStrategy for ConfirmationGate {
    fn completion_step(&self) -> CompletionStep {
        CompletionStep::AwaitConfirmation(self.kind)
    }
}

#[derive(Debug)]
struct StepVisibility;

impl ScenarioStrategy for StepVisibility {
    fn milestone_tag(&self, milestone: Milestone) -> Option<&'static str> {
        Some(milestone.as_str())
    }
}

#[derive(Debug)]
struct RepeatedLoad;

impl ScenarioStrategy for RepeatedLoad {
    fn after_stage(&self, stage: StageName) -> StageDirective {
        match stage {
            StageName::Load => StageDirective::Repeat,
            _ => StageDirective::Continue,
        }
    }
}

static HAPPY_PATH: HappyPath = HappyPath;
static INJECTED_DEFECT: InjectedDefect = InjectedDefect;
static FORCED_REJECTION: ForcedRejection = ForcedRejection;
static SIGNAL_GATE: ConfirmationGate = ConfirmationGate {
    kind: ConfirmationKind::Signal,
};
static UPDATE_GATE: ConfirmationGate = ConfirmationGate {
    kind: ConfirmationKind::Update,
};
static STEP_VISIBILITY: StepVisibility = StepVisibility;
static REPEATED_LOAD: RepeatedLoad = RepeatedLoad;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_every_type_name() {
        for variant in ScenarioVariant::ALL {
            assert_eq!(ScenarioVariant::resolve(variant.type_name()).unwrap(), variant);
        }
    }

    #[test]
    fn test_resolve_alias() {
        let variant: ScenarioVariant = "DataPipelineWorkflowNonRecoverableFailure".parse().unwrap();
        assert_eq!(variant, ScenarioVariant::NonRecoverableFailure);
    }

    #[test]
    fn test_unknown_type_name() {
        let err = ScenarioVariant::resolve("DataPipelineSomethingElse").unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownVariant { ref name } if name == "DataPipelineSomethingElse"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_happy_path_rejects_softly() {
        for variant in ScenarioVariant::ALL {
            let expected = if variant == ScenarioVariant::Happy {
                RejectionPolicy::Soft
            } else {
                RejectionPolicy::Escalate
            };
            assert_eq!(variant.strategy().rejection_policy(), expected, "{variant}");
        }
    }

    #[test]
    fn test_forced_rejection_override() {
        let strategy = ScenarioVariant::NonRecoverableFailure.strategy();
        assert_eq!(
            strategy.validation_override(),
            Some(ValidationOverride::new("blue"))
        );
        assert_eq!(ScenarioVariant::Happy.strategy().validation_override(), None);
    }

    #[test]
    fn test_stage_directives() {
        assert_eq!(
            ScenarioVariant::RecoverableBug.strategy().after_stage(StageName::Transform),
            StageDirective::RaiseDefect("Workflow bug!")
        );
        assert_eq!(
            ScenarioVariant::RecoverableBug.strategy().after_stage(StageName::Extract),
            StageDirective::Continue
        );
        assert_eq!(
            ScenarioVariant::Idempotency.strategy().after_stage(StageName::Load),
            StageDirective::Repeat
        );
    }

    #[test]
    fn test_completion_steps() {
        assert_eq!(
            ScenarioVariant::HumanSignal.strategy().completion_step(),
            CompletionStep::AwaitConfirmation(ConfirmationKind::Signal)
        );
        assert_eq!(
            ScenarioVariant::HumanUpdate.strategy().completion_step(),
            CompletionStep::AwaitConfirmation(ConfirmationKind::Update)
        );
        assert_eq!(ScenarioVariant::Idempotency.strategy().completion_step(), CompletionStep::Poll);
    }

    #[test]
    fn test_only_visibility_publishes_tags() {
        assert_eq!(
            ScenarioVariant::AdvancedVisibility.strategy().milestone_tag(Milestone::Complete),
            Some("complete")
        );
        assert_eq!(ScenarioVariant::Happy.strategy().milestone_tag(Milestone::Load), None);
    }
}
