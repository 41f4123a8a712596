//! QueueRegistry: the named queues of a server and the workers using them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::NamedQueue;
use crate::config::QueueSettings;
use crate::domain::CruiseServerSnapshot;
use crate::worker::ProjectWorker;

/// One `NamedQueue` per distinct queue name, plus every registered worker in
/// registration order.
#[derive(Default)]
pub struct QueueRegistry {
    queues: Mutex<BTreeMap<String, Arc<NamedQueue>>>,
    workers: Mutex<Vec<Arc<ProjectWorker>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue called `name`, created from `settings` on first use.
    pub fn queue_for(&self, name: &str, settings: Option<&QueueSettings>) -> Arc<NamedQueue> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(name.to_string()).or_insert_with(|| {
            let settings = settings
                .cloned()
                .unwrap_or_else(|| QueueSettings::new(name));
            Arc::new(NamedQueue::with_settings(settings))
        });
        Arc::clone(queue)
    }

    pub fn queue(&self, name: &str) -> Option<Arc<NamedQueue>> {
        self.queues.lock().get(name).cloned()
    }

    pub fn register(&self, worker: Arc<ProjectWorker>) {
        self.workers.lock().push(worker);
    }

    pub fn worker(&self, project: &str) -> Option<Arc<ProjectWorker>> {
        self.workers
            .lock()
            .iter()
            .find(|w| w.name() == project)
            .cloned()
    }

    pub fn workers(&self) -> Vec<Arc<ProjectWorker>> {
        self.workers.lock().clone()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.workers
            .lock()
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }

    /// Sorted names of every queue.
    pub fn get_queue_names(&self) -> Vec<String> {
        self.queues.lock().keys().cloned().collect()
    }

    /// Abort (`forced`) or stop every worker, then forget all queues and
    /// workers. Returns the workers so the caller can wait for them to exit.
    pub fn stop_all_projects(&self, forced: bool) -> Vec<Arc<ProjectWorker>> {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in &workers {
            if forced {
                worker.abort();
            } else {
                worker.stop(true);
            }
        }

        let queues = std::mem::take(&mut *self.queues.lock());
        for queue in queues.values() {
            queue.clear();
        }

        info!(projects = workers.len(), queues = queues.len(), forced, "all projects stopped");
        workers
    }

    /// Point-in-time view of every project and queue; not cached.
    pub fn snapshot(&self) -> CruiseServerSnapshot {
        let projects = self.workers().iter().map(|w| w.status()).collect();
        let queues = self
            .queues
            .lock()
            .values()
            .map(|q| q.snapshot())
            .collect();
        CruiseServerSnapshot { projects, queues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::domain::WorkerState;
    use crate::impls::InMemoryStateStore;
    use crate::ports::{ProjectDefinition, SystemClock};
    use crate::testing::{FakeExecutor, FakeTrigger};

    fn worker(registry: &QueueRegistry, name: &str, queue: &str) -> Arc<ProjectWorker> {
        let executor = FakeExecutor::with_settings(FakeExecutor::test_settings(name).with_queue(queue));
        let worker = Arc::new(ProjectWorker::new(
            ProjectDefinition::new(executor, FakeTrigger::new()),
            registry.queue_for(queue, None),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(SystemClock),
        ));
        registry.register(worker.clone());
        worker
    }

    #[test]
    fn queue_names_are_sorted() {
        let registry = QueueRegistry::new();
        for name in ["ProjectQueueOne", "ProjectQueueTwo", "ProjectQueueThree"] {
            registry.queue_for(name, None);
        }
        registry.queue_for("ProjectQueueOne", None);

        assert_eq!(
            registry.get_queue_names(),
            vec!["ProjectQueueOne", "ProjectQueueThree", "ProjectQueueTwo"]
        );
    }

    #[test]
    fn queue_settings_apply_on_first_use_only() {
        let registry = QueueRegistry::new();
        let settings = QueueSettings::new("q").with_duplicates(DuplicatePolicy::UseFirst);

        let first = registry.queue_for("q", Some(&settings));
        let second = registry.queue_for("q", None);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.settings().duplicates, DuplicatePolicy::UseFirst);
    }

    #[tokio::test]
    async fn stop_all_projects_forgets_everything() {
        let registry = QueueRegistry::new();
        let alpha = worker(&registry, "alpha", "shared");
        let beta = worker(&registry, "beta", "other");
        alpha.start();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.projects.len(), 2);
        assert_eq!(snapshot.queues.len(), 2);
        assert_eq!(snapshot.project("alpha").unwrap().queue, "shared");
        assert_eq!(registry.worker("beta").unwrap().name(), "beta");

        let stopped = registry.stop_all_projects(false);
        for worker in &stopped {
            worker.wait_for_exit().await;
        }

        assert_eq!(stopped.len(), 2);
        assert_eq!(alpha.state(), WorkerState::Stopped);
        assert_eq!(beta.state(), WorkerState::Stopped);
        assert!(registry.get_queue_names().is_empty());
        assert!(registry.project_names().is_empty());
    }
}
