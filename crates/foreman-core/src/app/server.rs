//! OrchestrationServer - owns the fleet of project workers.
//!
//! # Commands
//! Every project-addressed command raises a "received" event first. Any
//! handler answering `Cancel` abandons the command silently; otherwise it runs
//! and a "processed" event follows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{Span, info, info_span};

use super::EventBus;
use crate::domain::{
    CommandEvent, CruiseServerSnapshot, Disposition, IntegrationRequest, Message, ProjectCommand,
    QueueSnapshot, WorkerState,
};
use crate::error::{ConfigError, ForemanError};
use crate::ports::{Clock, Configuration, ConfigurationSource, EventSink, ResultContinuityStore};
use crate::queue::QueueRegistry;
use crate::worker::{ProjectWorker, RetryPolicy};

pub struct OrchestrationServer {
    name: String,
    source: Arc<dyn ConfigurationSource>,
    store: Arc<dyn ResultContinuityStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    registry: QueueRegistry,
    events: Arc<EventBus>,
    disposed: AtomicBool,
    span: Span,
}

impl OrchestrationServer {
    /// Wire a server around an already loaded configuration.
    ///
    /// Use `ServerBuilder` for the validated path.
    pub(crate) fn new(
        name: String,
        source: Arc<dyn ConfigurationSource>,
        configuration: Configuration,
        store: Arc<dyn ResultContinuityStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        events: Arc<EventBus>,
    ) -> Result<Self, ConfigError> {
        let span = info_span!("server", server = %name);
        let server = Self {
            name,
            source,
            store,
            clock,
            retry,
            registry: QueueRegistry::new(),
            events,
            disposed: AtomicBool::new(false),
            span,
        };
        server.populate(configuration)?;
        Ok(server)
    }

    fn populate(&self, configuration: Configuration) -> Result<(), ConfigError> {
        configuration.validate()?;
        for project in configuration.projects.iter().cloned() {
            let queue_name = project.executor.queue_name().to_string();
            let queue = self
                .registry
                .queue_for(&queue_name, configuration.queue_settings(&queue_name));
            let sink: Arc<dyn EventSink> = self.events.clone();
            let worker = ProjectWorker::new(project, queue, Arc::clone(&self.store), Arc::clone(&self.clock))
                .with_events(sink)
                .with_retry_policy(self.retry.clone());
            self.registry.register(Arc::new(worker));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe here for received/processed and integration events.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn start(&self) {
        let _guard = self.span.enter();
        let workers = self.registry.workers();
        for worker in &workers {
            worker.start();
        }
        info!(projects = workers.len(), "server started");
    }

    /// Stop every worker; builds in flight finish first.
    pub fn stop(&self) {
        let _guard = self.span.enter();
        for worker in self.registry.workers() {
            worker.stop(true);
        }
        info!("server stopping");
    }

    pub fn abort(&self) {
        let _guard = self.span.enter();
        for worker in self.registry.workers() {
            worker.abort();
        }
        info!("server aborting");
    }

    /// Abort every worker, reload the configuration and start the new set.
    pub async fn restart(&self) -> Result<(), ForemanError> {
        info!(parent: &self.span, "server restarting");
        for worker in self.registry.stop_all_projects(true) {
            worker.wait_for_exit().await;
        }

        let configuration = self.source.load()?;
        self.populate(configuration)?;
        self.start();
        Ok(())
    }

    pub async fn wait_for_exit(&self) {
        for worker in self.registry.workers() {
            worker.wait_for_exit().await;
        }
    }

    pub async fn wait_for_project_exit(&self, project: &str) -> Result<(), ForemanError> {
        self.worker(project)?.wait_for_exit().await;
        Ok(())
    }

    /// Abort and wait for every worker. Later calls do nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(parent: &self.span, "server disposing");
        for worker in self.registry.stop_all_projects(true) {
            worker.wait_for_exit().await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub async fn start_project(&self, project: &str) -> Result<(), ForemanError> {
        self.command(project, ProjectCommand::Start).await
    }

    pub async fn stop_project(&self, project: &str) -> Result<(), ForemanError> {
        self.command(project, ProjectCommand::Stop).await
    }

    pub async fn force_build(
        &self,
        project: &str,
        enforcer: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<(), ForemanError> {
        let command = ProjectCommand::ForceBuild {
            enforcer: enforcer.to_string(),
            parameters,
        };
        self.command(project, command).await
    }

    pub async fn request(&self, project: &str, request: IntegrationRequest) -> Result<(), ForemanError> {
        self.command(project, ProjectCommand::Request(request)).await
    }

    pub async fn abort_build(&self, project: &str, enforcer: &str) -> Result<(), ForemanError> {
        let command = ProjectCommand::AbortBuild {
            enforcer: enforcer.to_string(),
        };
        self.command(project, command).await
    }

    pub async fn send_message(&self, project: &str, message: Message) -> Result<(), ForemanError> {
        self.command(project, ProjectCommand::SendMessage(message)).await
    }

    pub async fn cancel_pending_request(&self, project: &str) -> Result<(), ForemanError> {
        self.command(project, ProjectCommand::CancelPending).await
    }

    pub fn get_queue_names(&self) -> Vec<String> {
        self.registry.get_queue_names()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.registry.project_names()
    }

    pub fn get_cruise_server_snapshot(&self) -> CruiseServerSnapshot {
        self.registry.snapshot()
    }

    pub fn queue_snapshot(&self, queue: &str) -> Result<QueueSnapshot, ForemanError> {
        self.registry
            .queue(queue)
            .map(|q| q.snapshot())
            .ok_or_else(|| ForemanError::UnknownQueue(queue.to_string()))
    }

    fn worker(&self, project: &str) -> Result<Arc<ProjectWorker>, ForemanError> {
        self.registry
            .worker(project)
            .ok_or_else(|| ForemanError::UnknownProject(project.to_string()))
    }

    async fn command(&self, project: &str, command: ProjectCommand) -> Result<(), ForemanError> {
        let worker = self.worker(project)?;

        let received = CommandEvent {
            kind: command.received_kind(),
            project: project.to_string(),
            command,
        };
        if self.events.raise_received(&received) == Disposition::Cancel {
            info!(parent: &self.span, project, kind = ?received.kind, "command cancelled by a handler");
            return Ok(());
        }

        let CommandEvent { command, .. } = received;
        match &command {
            ProjectCommand::Start => {
                if worker.state() == WorkerState::Stopping {
                    worker.wait_for_exit().await;
                }
                worker.start();
            }
            ProjectCommand::Stop => worker.stop(true),
            ProjectCommand::ForceBuild {
                enforcer,
                parameters,
            } => worker.force_build(enforcer, parameters.clone())?,
            ProjectCommand::Request(request) => worker.request(request.clone())?,
            ProjectCommand::AbortBuild { enforcer } => {
                worker.abort_build(enforcer);
            }
            ProjectCommand::SendMessage(message) => worker.send_message(message.clone()),
            ProjectCommand::CancelPending => {
                worker.cancel_pending_request();
            }
        }

        self.events.raise_processed(&CommandEvent {
            kind: command.processed_kind(),
            project: project.to_string(),
            command,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::app::ServerBuilder;
    use crate::config::QueueSettings;
    use crate::domain::{EventKind, IntegrationStatus, MessageKind, ProjectActivity};
    use crate::impls::{InMemoryStateStore, StaticConfiguration};
    use crate::ports::ProjectDefinition;
    use crate::testing::{FakeExecutor, FakeOutcome, FakeTrigger, wait_until};

    struct Fleet {
        server: OrchestrationServer,
        executors: Vec<Arc<FakeExecutor>>,
        source: Arc<StaticConfiguration>,
    }

    fn configuration(executors: &[Arc<FakeExecutor>]) -> Configuration {
        Configuration {
            projects: executors
                .iter()
                .map(|e| ProjectDefinition::new(e.clone(), FakeTrigger::new()))
                .collect(),
            queues: vec![QueueSettings::new("shared")],
        }
    }

    fn fleet(names: &[&str]) -> Fleet {
        let executors: Vec<_> = names.iter().map(|n| FakeExecutor::new(n)).collect();
        let source = Arc::new(StaticConfiguration::new(configuration(&executors)));
        let server = ServerBuilder::new()
            .configuration_source(source.clone())
            .state_store(Arc::new(InMemoryStateStore::new()))
            .retry_policy(RetryPolicy::fixed(std::time::Duration::from_millis(1)))
            .build()
            .unwrap();
        Fleet {
            server,
            executors,
            source,
        }
    }

    #[tokio::test]
    async fn unknown_project_is_an_error() {
        let fleet = fleet(&["alpha"]);

        let err = fleet
            .server
            .force_build("nope", "alice", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::UnknownProject(name) if name == "nope"));
        assert!(fleet.server.wait_for_project_exit("nope").await.is_err());
    }

    #[tokio::test]
    async fn force_build_raises_command_and_integration_events() {
        let fleet = fleet(&["alpha"]);
        let kinds = Arc::new(Mutex::new(Vec::new()));
        {
            let kinds = kinds.clone();
            fleet.server.events().on_received(move |e| {
                kinds.lock().push(e.kind);
                Disposition::Proceed
            });
        }
        {
            let kinds = kinds.clone();
            fleet.server.events().on_processed(move |e| kinds.lock().push(e.kind));
        }
        let integrations = Arc::new(Mutex::new(Vec::new()));
        {
            let integrations = integrations.clone();
            fleet
                .server
                .events()
                .on_integration(move |e| integrations.lock().push((e.project.clone(), e.kind, e.status)));
        }

        fleet.server.start();
        fleet
            .server
            .force_build("alpha", "alice", BTreeMap::new())
            .await
            .unwrap();
        wait_until("the build to complete", || integrations.lock().len() == 2).await;

        assert_eq!(
            *kinds.lock(),
            vec![EventKind::ForceBuildReceived, EventKind::ForceBuildProcessed]
        );
        assert_eq!(
            *integrations.lock(),
            vec![
                ("alpha".to_string(), EventKind::IntegrationStarted, IntegrationStatus::Unknown),
                ("alpha".to_string(), EventKind::IntegrationCompleted, IntegrationStatus::Success),
            ]
        );

        fleet.server.dispose().await;
    }

    #[tokio::test]
    async fn cancelled_received_event_abandons_the_command() {
        let fleet = fleet(&["alpha"]);
        let processed = Arc::new(AtomicUsize::new(0));
        fleet.server.events().on_received(|e| {
            if e.kind == EventKind::ForceBuildReceived {
                Disposition::Cancel
            } else {
                Disposition::Proceed
            }
        });
        {
            let processed = processed.clone();
            fleet.server.events().on_processed(move |_| {
                processed.fetch_add(1, Ordering::SeqCst);
            });
        }
        fleet.server.start();

        fleet
            .server
            .force_build("alpha", "alice", BTreeMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fleet.executors[0].integrations(), 0);
        assert_eq!(processed.load(Ordering::SeqCst), 0);

        fleet
            .server
            .send_message("alpha", Message::new("deploy freeze"))
            .await
            .unwrap();
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        let status = fleet.server.get_cruise_server_snapshot();
        assert_eq!(status.project("alpha").unwrap().messages[0].kind, MessageKind::Info);

        fleet.server.dispose().await;
    }

    #[tokio::test]
    async fn snapshot_shows_queues_sorted_and_projects_in_order() {
        let executors = vec![
            FakeExecutor::with_settings(FakeExecutor::test_settings("b").with_queue("ProjectQueueTwo")),
            FakeExecutor::with_settings(FakeExecutor::test_settings("a").with_queue("ProjectQueueOne")),
            FakeExecutor::with_settings(FakeExecutor::test_settings("c").with_queue("ProjectQueueThree")),
        ];
        let server = ServerBuilder::new()
            .configuration_source(Arc::new(StaticConfiguration::new(configuration(&executors))))
            .build()
            .unwrap();

        assert_eq!(
            server.get_queue_names(),
            vec!["ProjectQueueOne", "ProjectQueueThree", "ProjectQueueTwo"]
        );
        assert_eq!(server.project_names(), vec!["b", "a", "c"]);

        let snapshot = server.get_cruise_server_snapshot();
        assert_eq!(snapshot.queues.len(), 3);
        assert!(snapshot.queues.iter().all(|q| q.is_empty()));
        assert_eq!(snapshot.project("a").unwrap().state, WorkerState::Unknown);
        assert_eq!(snapshot.project("a").unwrap().activity, ProjectActivity::Sleeping);

        assert!(server.queue_snapshot("ProjectQueueOne").unwrap().is_empty());
        assert!(matches!(
            server.queue_snapshot("missing"),
            Err(ForemanError::UnknownQueue(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn stop_and_start_a_single_project() {
        let fleet = fleet(&["alpha", "beta"]);
        fleet.server.start();

        fleet.server.stop_project("alpha").await.unwrap();
        fleet.server.wait_for_project_exit("alpha").await.unwrap();
        let snapshot = fleet.server.get_cruise_server_snapshot();
        assert_eq!(snapshot.project("alpha").unwrap().state, WorkerState::Stopped);
        assert_eq!(snapshot.project("beta").unwrap().state, WorkerState::Running);

        fleet.server.start_project("alpha").await.unwrap();
        fleet
            .server
            .force_build("alpha", "alice", BTreeMap::new())
            .await
            .unwrap();
        wait_until("alpha to build", || fleet.executors[0].integrations() == 1).await;

        fleet.server.stop();
        fleet.server.wait_for_exit().await;
        let snapshot = fleet.server.get_cruise_server_snapshot();
        assert!(snapshot.projects.iter().all(|p| p.state == WorkerState::Stopped));
    }

    #[tokio::test]
    async fn abort_build_and_cancel_pending_reach_the_worker() {
        let fleet = fleet(&["alpha"]);
        fleet.executors[0].set_outcome(FakeOutcome::Hang);
        fleet.server.start();

        fleet
            .server
            .force_build("alpha", "alice", BTreeMap::new())
            .await
            .unwrap();
        wait_until("the build to start", || fleet.executors[0].integrations() == 1).await;

        fleet.server.abort_build("alpha", "bob").await.unwrap();
        wait_until("the build to stop", || {
            fleet.server.get_cruise_server_snapshot().project("alpha").unwrap().activity
                == ProjectActivity::Sleeping
        })
        .await;
        fleet.server.cancel_pending_request("alpha").await.unwrap();

        let status = fleet.server.get_cruise_server_snapshot();
        let alpha = status.project("alpha").unwrap();
        assert_eq!(alpha.state, WorkerState::Running);
        assert_eq!(alpha.messages[0].kind, MessageKind::BuildAborted);

        fleet.server.dispose().await;
    }

    #[tokio::test]
    async fn restart_replaces_the_workers() {
        let fleet = fleet(&["alpha"]);
        fleet.server.start();

        let replacement = FakeExecutor::with_settings(FakeExecutor::test_settings("beta").with_queue("other"));
        fleet.source.replace(configuration(&[replacement.clone()]));
        fleet.server.restart().await.unwrap();

        assert_eq!(fleet.server.project_names(), vec!["beta"]);
        assert_eq!(fleet.server.get_queue_names(), vec!["other"]);
        assert_eq!(fleet.executors[0].aborts(), 1);
        let snapshot = fleet.server.get_cruise_server_snapshot();
        assert_eq!(snapshot.project("beta").unwrap().state, WorkerState::Running);
        assert!(matches!(
            fleet.server.start_project("alpha").await,
            Err(ForemanError::UnknownProject(_))
        ));

        fleet.server.dispose().await;
    }

    #[tokio::test]
    async fn restart_with_a_broken_configuration_reports_it() {
        let fleet = fleet(&["alpha"]);
        let duplicate = vec![FakeExecutor::new("x"), FakeExecutor::new("x")];
        fleet.source.replace(configuration(&duplicate));

        let err = fleet.server.restart().await.unwrap_err();
        assert!(matches!(
            err,
            ForemanError::Configuration(ConfigError::DuplicateProject(_))
        ));
        assert!(fleet.server.project_names().is_empty());
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let fleet = fleet(&["alpha"]);
        fleet.server.start();

        fleet.server.dispose().await;
        fleet.server.dispose().await;

        assert!(fleet.server.is_disposed());
        assert_eq!(fleet.executors[0].aborts(), 1);
        assert!(fleet.server.project_names().is_empty());
    }
}
