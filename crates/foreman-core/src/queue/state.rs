//! Item state machine for a named queue.

use serde::{Deserialize, Serialize};

use crate::domain::ProjectActivity;

/// Position of a queued item.
///
/// State transitions:
/// - Pending -> Granted -> Building -> (dequeued)
/// - Pending -> (cancelled)
/// - Granted -> (cancelled, the next head is granted)
///
/// Only the head of a queue is ever Granted or Building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Waiting behind another item.
    Pending,

    /// At the head; the owning worker has been told to run it.
    Granted,

    /// The owning worker is running the build.
    Building,
}

impl ItemStatus {
    /// Can a cancellation still remove this item?
    pub fn is_cancellable(self) -> bool {
        !matches!(self, ItemStatus::Building)
    }

    /// Does this item hold the running slot?
    pub fn holds_slot(self) -> bool {
        matches!(self, ItemStatus::Granted | ItemStatus::Building)
    }

    pub fn activity(self) -> ProjectActivity {
        match self {
            ItemStatus::Building => ProjectActivity::Building,
            ItemStatus::Pending | ItemStatus::Granted => ProjectActivity::Pending,
        }
    }
}
