//! Per-instance execution state and progress checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Fixed progress checkpoints of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// The instance has been created.
    Started,
    /// A worker channel has been selected.
    WorkerSelected,
    /// Validation has returned.
    Validated,
    /// Extraction has completed.
    Extracted,
    /// Transformation has completed.
    Transformed,
    /// Loading has completed.
    Loaded,
    /// The pipeline has finished.
    Completed,
}

impl Checkpoint {
    /// All checkpoints in pipeline order.
    pub const ALL: [Self; 7] = [
        Self::Started,
        Self::WorkerSelected,
        Self::Validated,
        Self::Extracted,
        Self::Transformed,
        Self::Loaded,
        Self::Completed,
    ];

    /// Returns the progress percentage recorded at this checkpoint.
    #[must_use]
    pub const fn percent(self) -> u8 {
        match self {
            Self::Started => 0,
            Self::WorkerSelected => 10,
            Self::Validated => 20,
            Self::Extracted => 40,
            Self::Transformed => 60,
            Self::Loaded => 80,
            Self::Completed => 100,
        }
    }

    /// Returns true if `percent` is one of the checkpoint values.
    #[must_use]
    pub fn is_checkpoint_value(percent: u8) -> bool {
        Self::ALL.iter().any(|c| c.percent() == percent)
    }
}

/// External confirmation channel the human-in-the-loop gate waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    /// Fire-and-forget signal.
    Signal,
    /// Synchronous update with acknowledgment.
    Update,
}

impl fmt::Display for ConfirmationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "signal"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Mutable state owned by one orchestration instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Progress percentage, always a checkpoint value.
    pub progress: u8,
    /// Whether the load-complete signal arrived.
    pub human_signal_received: bool,
    /// Whether the load-complete update arrived.
    pub human_update_received: bool,
}

impl ExecutionState {
    /// Returns true if the given confirmation has been received.
    #[must_use]
    pub const fn is_confirmed(&self, kind: ConfirmationKind) -> bool {
        match kind {
            ConfirmationKind::Signal => self.human_signal_received,
            ConfirmationKind::Update => self.human_update_received,
        }
    }
}

/// Owner of an instance's [`ExecutionState`].
///
/// Readers only ever receive copies. Progress only moves forward, and the
/// cell rejects every mutation once it has been sealed at a terminal result.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ExecutionState>,
    sealed: AtomicBool,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Creates a cell at progress 0.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ExecutionState::default());
        Self {
            tx,
            sealed: AtomicBool::new(false),
        }
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionState {
        *self.tx.borrow()
    }

    /// Returns the current progress percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.tx.borrow().progress
    }

    /// Moves progress forward to `checkpoint`.
    ///
    /// Returns false when the state is sealed or already at or past it.
    pub fn advance(&self, checkpoint: Checkpoint) -> bool {
        let target = checkpoint.percent();
        self.tx.send_if_modified(|state| {
            if self.is_sealed() {
                return false;
            }
            if state.progress < target {
                state.progress = target;
                true
            } else {
                false
            }
        })
    }

    /// Records an external confirmation.
    ///
    /// Returns false when the state is sealed.
    pub fn confirm(&self, kind: ConfirmationKind) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|state| {
            if self.is_sealed() {
                return false;
            }
            match kind {
                ConfirmationKind::Signal => state.human_signal_received = true,
                ConfirmationKind::Update => state.human_update_received = true,
            }
            accepted = true;
            true
        });
        accepted
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.tx.subscribe()
    }

    /// Freezes the state at a terminal result.
    ///
    /// The flag is flipped under the channel lock, so a mutation either lands
    /// before the seal or is rejected.
    pub fn seal(&self) {
        self.tx.send_if_modified(|_| {
            self.sealed.store(true, Ordering::SeqCst);
            false
        });
    }

    /// Returns true once the state has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }
}
