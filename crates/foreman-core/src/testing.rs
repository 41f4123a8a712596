//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ProjectSettings;
use crate::domain::{
    BuildError, EventKind, IntegrationEvent, IntegrationRequest, IntegrationResult,
    IntegrationStatus, Modification,
};
use crate::ports::{BuildExecutor, EventSink, Trigger};
use crate::queue::QueueListener;

/// How a `FakeExecutor` build ends.
#[derive(Debug, Clone)]
pub(crate) enum FakeOutcome {
    Success,
    Failure,
    Error(String),
    /// Runs until cancelled.
    Hang,
    Panic(String),
}

pub(crate) struct FakeExecutor {
    settings: ProjectSettings,
    outcome: Mutex<FakeOutcome>,
    modifications: Mutex<Vec<Modification>>,
    fetch_failures: AtomicU32,
    gated: AtomicBool,
    gate: Semaphore,
    pending: AtomicUsize,
    sleeping: AtomicUsize,
    aborts: AtomicUsize,
    fetches: AtomicUsize,
    integrations: AtomicUsize,
}

impl FakeExecutor {
    /// Settings used by most tests: queue "shared", 10ms trigger polling.
    pub(crate) fn test_settings(name: &str) -> ProjectSettings {
        ProjectSettings::new(name)
            .with_queue("shared")
            .with_poll_interval(Duration::from_millis(10))
    }

    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with_settings(Self::test_settings(name))
    }

    pub(crate) fn with_priority(name: &str, priority: u32) -> Arc<Self> {
        Self::with_settings(Self::test_settings(name).with_queue_priority(priority))
    }

    pub(crate) fn with_settings(settings: ProjectSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            outcome: Mutex::new(FakeOutcome::Success),
            modifications: Mutex::new(Vec::new()),
            fetch_failures: AtomicU32::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            pending: AtomicUsize::new(0),
            sleeping: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            integrations: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_outcome(&self, outcome: FakeOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub(crate) fn set_modifications(&self, modifications: Vec<Modification>) {
        *self.modifications.lock() = modifications;
    }

    /// Make the next `n` modification checks fail.
    pub(crate) fn fail_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Builds wait for `release` before finishing.
    pub(crate) fn hold_builds(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.gate.add_permits(1);
    }

    pub(crate) fn pending_notifications(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn sleeping_notifications(&self) -> usize {
        self.sleeping.load(Ordering::SeqCst)
    }

    pub(crate) fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn integrations(&self) -> usize {
        self.integrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildExecutor for FakeExecutor {
    fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    async fn fetch_modifications(&self, result: &mut IntegrationResult) -> Result<(), BuildError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BuildError::SourceControl("repository unreachable".into()));
        }
        result.modifications = self.modifications.lock().clone();
        Ok(())
    }

    async fn integrate(
        &self,
        result: &mut IntegrationResult,
        cancel: CancellationToken,
    ) -> Result<(), BuildError> {
        self.integrations.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        let outcome = self.outcome.lock().clone();
        match outcome {
            FakeOutcome::Success => {
                result.status = IntegrationStatus::Success;
                Ok(())
            }
            FakeOutcome::Failure => {
                result.status = IntegrationStatus::Failure;
                result.failed_tasks = vec!["test".into()];
                Ok(())
            }
            FakeOutcome::Error(message) => Err(BuildError::Execution(message)),
            FakeOutcome::Hang => {
                cancel.cancelled().await;
                Err(BuildError::Cancelled)
            }
            FakeOutcome::Panic(message) => panic!("{message}"),
        }
    }

    fn notify_pending_state(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_sleeping_state(&self) {
        self.sleeping.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out scripted decisions, one per `fire`.
#[derive(Default)]
pub(crate) struct FakeTrigger {
    decisions: Mutex<VecDeque<IntegrationRequest>>,
    completed: AtomicUsize,
}

impl FakeTrigger {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, request: IntegrationRequest) {
        self.decisions.lock().push_back(request);
    }

    pub(crate) fn completions(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Trigger for FakeTrigger {
    fn fire(&self) -> Option<IntegrationRequest> {
        self.decisions.lock().pop_front()
    }

    fn integration_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn next_build(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    cancelled: AtomicUsize,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn cancellations(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl QueueListener for RecordingListener {
    fn exiting_queue(&self, cancelled: bool) {
        if cancelled {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<IntegrationEvent>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<IntegrationEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn completed(&self) -> Vec<IntegrationStatus> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::IntegrationCompleted)
            .map(|e| e.status)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn integration_event(&self, event: IntegrationEvent) {
        self.events.lock().push(event);
    }
}

/// Poll `condition` until it holds; panics after a few seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
