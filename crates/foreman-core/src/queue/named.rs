//! NamedQueue: serializes builds of every project that shares a queue name.
//!
//! # Ordering
//! Prioritized items go ahead of unprioritized ones, lower numbers first.
//! Equal priorities keep arrival order. Only the head item is ever granted.
//!
//! # Duplicates
//! A second request for a project already queued goes through the queue's
//! `DuplicatePolicy`. `ReplaceWithForce` swaps a pending item in place, and the
//! replaced ticket's grant resolves with an error.
//!
//! # Notifications
//! Items behind the head get `notify_pending_state`. A project is told it is
//! sleeping again only when it leaves the head with nothing else queued.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{ItemStatus, QueuedItem};
use crate::config::{DuplicatePolicy, QueueSettings};
use crate::domain::{
    BuildCondition, ProjectActivity, QueueSnapshot, QueuedRequestSnapshot, RequestId,
};
use crate::ports::BuildExecutor;

/// Ticket returned by `enqueue`.
///
/// `granted` resolves when the item reaches the head of the queue. It
/// resolves with an error if the item is removed before that.
#[derive(Debug)]
pub struct Admission {
    pub id: RequestId,
    pub granted: oneshot::Receiver<()>,
}

/// What `cancel_pending` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    pub removed: usize,
    /// One of the removed items held the head of the queue.
    pub held_head: bool,
    /// Items of the same project still queued (building ones).
    pub remaining: bool,
}

/// An ordered list of requests; the head holds the running slot.
///
/// Invariants:
/// - at most one item is Granted or Building, and it is the head;
/// - every other item is Pending, ordered by (priority, arrival);
/// - a non-empty queue always has its head Granted or Building.
///
/// Priority 0 means "none" and appends at the back. A priority n > 0 is
/// inserted in front of the first pending item whose priority is 0 or greater
/// than n, so lower numbers run first and equal numbers keep arrival order.
///
/// Every mutation happens under one mutex. Project notifications and queue
/// listeners are called after the guard is dropped so they may re-enter.
pub struct NamedQueue {
    name: String,
    settings: QueueSettings,
    items: Mutex<Vec<QueuedItem>>,
}

impl NamedQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_settings(QueueSettings::new(name))
    }

    pub fn with_settings(settings: QueueSettings) -> Self {
        Self {
            name: settings.name.clone(),
            settings,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn priority_for(&self, project: &dyn BuildExecutor) -> u32 {
        self.settings
            .priorities
            .get(project.name())
            .copied()
            .unwrap_or_else(|| project.queue_priority())
    }

    /// Add an item. Returns `None` when the duplicate policy dropped it.
    pub fn enqueue(&self, mut item: QueuedItem) -> Option<Admission> {
        let (tx, rx) = oneshot::channel();
        item.attach_grant(tx);
        item.priority = self.priority_for(item.project.as_ref());
        item.status = ItemStatus::Pending;

        let id = item.id();
        let project = Arc::clone(&item.project);

        let first_for_project = {
            let mut items = self.items.lock();

            let duplicate = items
                .iter()
                .position(|i| i.status == ItemStatus::Pending && i.project_name() == item.project_name());
            if let Some(pos) = duplicate {
                match self.settings.duplicates {
                    DuplicatePolicy::Allow => {}
                    DuplicatePolicy::UseFirst => {
                        debug!(queue = %self.name, project = %item.project_name(), "duplicate request dropped");
                        return None;
                    }
                    DuplicatePolicy::ReplaceWithForce => {
                        let pending = items[pos].request.condition();
                        if item.request.condition() == BuildCondition::ForceBuild
                            && pending < BuildCondition::ForceBuild
                        {
                            debug!(queue = %self.name, project = %item.project_name(), "pending request replaced by force build");
                            item.priority = items[pos].priority;
                            items[pos] = item;
                            return Some(Admission { id, granted: rx });
                        }
                        debug!(queue = %self.name, project = %item.project_name(), "duplicate request dropped");
                        return None;
                    }
                }
            }

            let first_for_project = !items.iter().any(|i| i.project_name() == item.project_name());
            let at = insertion_index(&items, item.priority);
            debug!(queue = %self.name, project = %item.project_name(), position = at, "request queued");
            items.insert(at, item);
            grant_head(&mut items);
            first_for_project
        };

        if first_for_project {
            project.notify_pending_state();
        }
        Some(Admission { id, granted: rx })
    }

    /// The owning worker starts running its granted item.
    ///
    /// Returns false when `id` is not the granted head (it was cancelled).
    pub fn begin(&self, id: RequestId) -> bool {
        let mut items = self.items.lock();
        match items.first_mut() {
            Some(head) if head.id() == id && head.status == ItemStatus::Granted => {
                head.status = ItemStatus::Building;
                true
            }
            _ => false,
        }
    }

    /// Remove the head (normally after its build finished) and grant the next.
    ///
    /// The removed item's project is told it is still Pending when it has more
    /// items queued, and Sleeping otherwise.
    pub fn dequeue(&self) -> Option<QueuedItem> {
        let (removed, has_more) = {
            let mut items = self.items.lock();
            if items.is_empty() {
                return None;
            }
            let removed = items.remove(0);
            let has_more = items.iter().any(|i| i.project_name() == removed.project_name());
            grant_head(&mut items);
            (removed, has_more)
        };

        debug!(queue = %self.name, project = %removed.project_name(), "request dequeued");
        if has_more {
            removed.project.notify_pending_state();
        } else {
            removed.project.notify_sleeping_state();
        }
        Some(removed)
    }

    /// Remove every not-yet-building item of `project`.
    ///
    /// When this removes the project's last item, its listener is told once.
    /// The project itself is told it is sleeping only if one of the removed
    /// items held the head, i.e. nothing else was running.
    pub fn cancel_pending(&self, project: &str) -> CancelOutcome {
        let (removed, outcome) = {
            let mut items = self.items.lock();
            let held_head = items
                .first()
                .is_some_and(|h| h.project_name() == project && h.status.is_cancellable());

            let mut removed = Vec::new();
            let mut kept = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                if item.project_name() == project && item.status.is_cancellable() {
                    removed.push(item);
                } else {
                    kept.push(item);
                }
            }
            *items = kept;

            if held_head {
                grant_head(&mut items);
            }
            let remaining = items.iter().any(|i| i.project_name() == project);
            let outcome = CancelOutcome {
                removed: removed.len(),
                held_head,
                remaining,
            };
            (removed, outcome)
        };

        if let Some(last) = removed.last().filter(|_| !outcome.remaining) {
            debug!(queue = %self.name, project, removed = outcome.removed, "pending requests cancelled");
            last.listener.exiting_queue(true);
            if outcome.held_head {
                last.project.notify_sleeping_state();
            }
        }
        outcome
    }

    /// Remove one item that has not started building.
    ///
    /// Used by a stopping worker to withdraw its own request. As with
    /// `cancel_pending`, the project is told it is sleeping only when the
    /// removed item held the head and was its last.
    pub fn remove_item(&self, id: RequestId) -> Option<QueuedItem> {
        let (removed, held_head, has_more) = {
            let mut items = self.items.lock();
            let pos = items
                .iter()
                .position(|i| i.id() == id && i.status.is_cancellable())?;
            let removed = items.remove(pos);
            if pos == 0 {
                grant_head(&mut items);
            }
            let has_more = items.iter().any(|i| i.project_name() == removed.project_name());
            (removed, pos == 0, has_more)
        };

        if held_head && !has_more {
            removed.project.notify_sleeping_state();
        }
        Some(removed)
    }

    /// Copy of the pending and running entries, head first.
    pub fn get_queued_integrations(&self) -> Vec<QueuedRequestSnapshot> {
        self.items.lock().iter().map(QueuedItem::snapshot).collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.name.clone(),
            requests: self.get_queued_integrations(),
        }
    }

    pub fn has_items_for(&self, project: &str) -> bool {
        self.items.lock().iter().any(|i| i.project_name() == project)
    }

    /// Activity of `project` as seen from this queue, if it has items here.
    pub fn activity_for(&self, project: &str) -> Option<ProjectActivity> {
        self.items
            .lock()
            .iter()
            .filter(|i| i.project_name() == project)
            .map(|i| i.status.activity())
            .max_by_key(|a| matches!(a, ProjectActivity::Building))
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every item without notifications.
    pub(crate) fn clear(&self) {
        self.items.lock().clear();
    }
}

fn insertion_index(items: &[QueuedItem], priority: u32) -> usize {
    if priority == 0 {
        return items.len();
    }
    items
        .iter()
        .position(|i| !i.status.holds_slot() && (i.priority == 0 || i.priority > priority))
        .unwrap_or(items.len())
}

fn grant_head(items: &mut [QueuedItem]) {
    if let Some(head) = items.first_mut().filter(|h| h.status == ItemStatus::Pending) {
        head.grant();
    }
}
