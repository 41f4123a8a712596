//! Queued item: a request waiting for (or holding) a queue's running slot.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::ItemStatus;
use crate::domain::{IntegrationRequest, QueuedRequestSnapshot, RequestId};
use crate::ports::BuildExecutor;

/// Told when an item leaves its queue without having been run.
///
/// Implemented by the project worker that owns the item.
pub trait QueueListener: Send + Sync {
    /// Called once when a cancellation removed the project's last item.
    fn exiting_queue(&self, cancelled: bool);
}

/// A request owned by a `NamedQueue` from enqueue until dequeue or cancel.
pub struct QueuedItem {
    pub(crate) project: Arc<dyn BuildExecutor>,
    pub(crate) request: IntegrationRequest,
    pub(crate) listener: Arc<dyn QueueListener>,
    pub(crate) status: ItemStatus,
    /// Effective priority inside its queue (0 = none).
    pub(crate) priority: u32,
    pub(crate) enqueued_at: DateTime<Utc>,
    grant: Option<oneshot::Sender<()>>,
}

impl QueuedItem {
    pub fn new(
        project: Arc<dyn BuildExecutor>,
        request: IntegrationRequest,
        listener: Arc<dyn QueueListener>,
    ) -> Self {
        Self {
            project,
            request,
            listener,
            status: ItemStatus::Pending,
            priority: 0,
            enqueued_at: Utc::now(),
            grant: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.request.id()
    }

    pub fn project_name(&self) -> &str {
        self.project.name()
    }

    pub fn project(&self) -> &Arc<dyn BuildExecutor> {
        &self.project
    }

    pub fn request(&self) -> &IntegrationRequest {
        &self.request
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub(crate) fn attach_grant(&mut self, grant: oneshot::Sender<()>) {
        self.grant = Some(grant);
    }

    /// Give this item the running slot and wake its worker.
    pub(crate) fn grant(&mut self) {
        self.status = ItemStatus::Granted;
        if let Some(tx) = self.grant.take() {
            // ignore send error: the worker may have stopped waiting
            let _ = tx.send(());
        }
    }

    pub(crate) fn snapshot(&self) -> QueuedRequestSnapshot {
        QueuedRequestSnapshot {
            id: self.id(),
            project: self.project_name().to_string(),
            activity: self.status.activity(),
            condition: self.request.condition(),
            source: self.request.source().to_string(),
            enqueued_at: self.enqueued_at,
        }
    }
}

impl fmt::Debug for QueuedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedItem")
            .field("id", &self.id())
            .field("project", &self.project_name())
            .field("condition", &self.request.condition())
            .field("status", &self.status)
            .field("priority", &self.priority)
            .finish()
    }
}
