//! Lifecycle and activity states of a project.

use serde::{Deserialize, Serialize};

/// Lifecycle of a project worker.
///
/// State transitions:
/// - Unknown -> Running -> Stopping -> Stopped -> Running (restartable)
/// - Unknown -> Stopping -> Stopped (stop before start never runs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Never started.
    #[default]
    Unknown,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    /// Is a background loop (possibly) alive in this state?
    pub fn is_live(self) -> bool {
        matches!(self, WorkerState::Running | WorkerState::Stopping)
    }
}

/// What a project is doing right now, as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectActivity {
    #[default]
    Sleeping,
    /// Waiting in its queue.
    Pending,
    CheckingModifications,
    Building,
}
