//! ProjectWorker - the per-project integration state machine.
//!
//! # Flow
//! 1. Wait for a mailbox post, the next trigger poll, or a stop signal
//! 2. Enqueue the request on the project's NamedQueue and wait for the grant,
//!    queueing anything posted meanwhile so the queue's duplicate policy applies
//! 3. Start a new IntegrationResult, check modifications (with retries)
//! 4. Build if needed, racing the build against the abort token
//! 5. Finish the result, dequeue, tell the trigger
//!
//! Errors never end the loop; only Stop/Abort do. A panicking executor or
//! trigger is caught and recorded as an Exception, and the queue slot is
//! always released.

mod retry;

pub use retry::RetryPolicy;

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::app::ResultContinuityManager;
use crate::config::ErrorHandling;
use crate::domain::{
    BuildError, ErrorKind, EventKind, IntegrationEvent, IntegrationRequest, IntegrationResult,
    IntegrationStatus, Message, MessageKind, ProjectActivity, ProjectStatus, WorkerState,
};
use crate::error::WorkerError;
use crate::ports::{
    BuildExecutor, Clock, EventSink, NoopEventSink, ProjectDefinition, ResultContinuityStore,
    Trigger,
};
use crate::queue::{Admission, CancelOutcome, NamedQueue, QueueListener, QueuedItem, RequestMailbox};

/// Floor for the trigger poll so an overdue trigger cannot spin the loop.
const MIN_POLL: Duration = Duration::from_millis(10);

/// Oldest messages are dropped past this many.
const MAX_MESSAGES: usize = 50;

/// Per-run abort control. Replaced on every `start`.
#[derive(Default)]
struct RunControl {
    cancel: CancellationToken,
    aborted: bool,
}

/// The integration in flight, if any.
#[derive(Default)]
struct CurrentBuild {
    activity: Option<ProjectActivity>,
    cancel: Option<CancellationToken>,
}

pub struct ProjectWorker {
    executor: Arc<dyn BuildExecutor>,
    trigger: Arc<dyn Trigger>,
    queue: Arc<NamedQueue>,
    continuity: ResultContinuityManager,
    mailbox: RequestMailbox,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    state: watch::Sender<WorkerState>,
    run: Mutex<RunControl>,
    current: Mutex<CurrentBuild>,
    messages: Mutex<VecDeque<Message>>,
    span: Span,
}

/// A request of this worker sitting in its queue.
struct Ticket {
    request: IntegrationRequest,
    admission: Admission,
}

/// What ended a wait for the running slot.
enum Wake {
    Stop,
    Granted(bool),
    Posted(IntegrationRequest),
}

/// Marks the worker Stopped when its loop task ends, however it ends.
struct ExitGuard<'a>(&'a watch::Sender<WorkerState>);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(WorkerState::Stopped);
    }
}

impl ProjectWorker {
    pub fn new(
        definition: ProjectDefinition,
        queue: Arc<NamedQueue>,
        store: Arc<dyn ResultContinuityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ProjectDefinition { executor, trigger } = definition;
        let continuity = ResultContinuityManager::new(executor.as_ref(), store, Arc::clone(&clock));
        let span = info_span!("project", project = %executor.name());
        let (state, _) = watch::channel(WorkerState::Unknown);

        Self {
            executor,
            trigger,
            queue,
            continuity,
            mailbox: RequestMailbox::new(),
            events: Arc::new(NoopEventSink),
            retry: RetryPolicy::default(),
            clock,
            state,
            run: Mutex::new(RunControl::default()),
            current: Mutex::new(CurrentBuild::default()),
            messages: Mutex::new(VecDeque::new()),
            span,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        self.executor.name()
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn executor(&self) -> &Arc<dyn BuildExecutor> {
        &self.executor
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn has_pending_request(&self) -> bool {
        self.mailbox.has_pending()
    }

    /// Spawn the integration loop. No-op while Running; refused while Stopping.
    pub fn start(self: &Arc<Self>) {
        let _guard = self.span.enter();
        let mut run = self.run.lock();
        match self.state() {
            WorkerState::Running => return,
            WorkerState::Stopping => {
                warn!("start ignored: previous loop still stopping");
                return;
            }
            WorkerState::Unknown | WorkerState::Stopped => {}
        }

        *run = RunControl::default();
        self.state.send_replace(WorkerState::Running);

        let worker = Arc::clone(self);
        tokio::spawn(worker.run_loop().instrument(self.span.clone()));
        info!("worker started");
    }

    /// Ask the loop to exit at its next suspension point.
    ///
    /// A build in flight always finishes. With `wait_for_current_to_finish`
    /// the pending mailbox request is dropped and the trigger is told to stand
    /// down right away.
    pub fn stop(&self, wait_for_current_to_finish: bool) {
        let _guard = self.span.enter();
        {
            let _run = self.run.lock();
            match self.state() {
                WorkerState::Unknown => {
                    self.state.send_replace(WorkerState::Stopped);
                    info!("worker stopped before it started");
                    return;
                }
                WorkerState::Running => {
                    self.state.send_replace(WorkerState::Stopping);
                }
                WorkerState::Stopping | WorkerState::Stopped => return,
            }
        }

        info!(wait_for_current_to_finish, "worker stopping");
        if wait_for_current_to_finish {
            self.mailbox.clear();
            self.complete_trigger();
        }
    }

    /// Stop and cancel the build in flight.
    ///
    /// The executor's `abort` runs at most once per run; repeated calls are
    /// no-ops.
    pub fn abort(&self) {
        let _guard = self.span.enter();
        let cancel = {
            let mut run = self.run.lock();
            if run.aborted {
                return;
            }
            match self.state() {
                WorkerState::Unknown => {
                    self.state.send_replace(WorkerState::Stopped);
                }
                WorkerState::Running => {
                    self.state.send_replace(WorkerState::Stopping);
                }
                WorkerState::Stopping | WorkerState::Stopped => {}
            }
            run.aborted = true;
            run.cancel.clone()
        };

        warn!("worker aborted");
        cancel.cancel();
        self.executor.abort();
    }

    /// Resolve once the loop has exited. Immediate when never started.
    pub async fn wait_for_exit(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| !s.is_live()).await;
    }

    /// Post a request; the loop picks it up at its next wake-up.
    pub fn request(&self, request: IntegrationRequest) -> Result<(), WorkerError> {
        if self.state() == WorkerState::Stopping {
            return Err(WorkerError::Stopping(self.name().to_string()));
        }
        let _guard = self.span.enter();
        let accepted = self.mailbox.post(request);
        debug!(accepted, "request posted");
        Ok(())
    }

    pub fn force_build(
        &self,
        enforcer: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<(), WorkerError> {
        self.request(IntegrationRequest::force(enforcer, parameters))
    }

    /// Cancel the build in flight, if any. The worker keeps running.
    pub fn abort_build(&self, enforcer: &str) -> bool {
        let _guard = self.span.enter();
        let Some(cancel) = self.current.lock().cancel.clone() else {
            debug!(enforcer, "no build to abort");
            return false;
        };

        cancel.cancel();
        self.send_message(
            Message::new(format!("Build aborted by {enforcer}")).with_kind(MessageKind::BuildAborted),
        );
        info!(enforcer, "build aborted");
        true
    }

    /// Withdraw this project's requests that have not started building.
    pub fn cancel_pending_request(&self) -> CancelOutcome {
        let _guard = self.span.enter();
        self.mailbox.clear();
        let outcome = self.queue.cancel_pending(self.name());
        if outcome.removed > 0 {
            info!(removed = outcome.removed, "pending requests cancelled");
        }
        outcome
    }

    /// Attach a message. Abort notices replace the previous one; beyond
    /// `MAX_MESSAGES` the oldest message goes.
    pub fn send_message(&self, message: Message) {
        let mut messages = self.messages.lock();
        if message.kind == MessageKind::BuildAborted {
            messages.retain(|m| m.kind != MessageKind::BuildAborted);
        }
        messages.push_back(message);
        while messages.len() > MAX_MESSAGES {
            messages.pop_front();
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn activity(&self) -> ProjectActivity {
        if let Some(activity) = self.current.lock().activity {
            return activity;
        }
        if self.queue.has_items_for(self.name()) {
            ProjectActivity::Pending
        } else {
            ProjectActivity::Sleeping
        }
    }

    pub fn status(&self) -> ProjectStatus {
        let last = self.continuity.cached().filter(|r| !r.is_initial());
        ProjectStatus {
            name: self.name().to_string(),
            queue: self.queue_name().to_string(),
            queue_priority: self.executor.queue_priority(),
            state: self.state(),
            activity: self.activity(),
            last_build_status: last.as_ref().map(|r| r.status).unwrap_or_default(),
            last_build_label: last.as_ref().map(|r| r.label.clone()),
            last_successful_label: last.as_ref().and_then(|r| {
                if r.succeeded() {
                    Some(r.label.clone())
                } else {
                    r.last_successful_label.clone()
                }
            }),
            last_build_at: last.as_ref().and_then(|r| r.finished_at),
            next_build_at: self.next_build(),
            messages: self.messages(),
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let _exit = ExitGuard(&self.state);
        let mut state = self.state.subscribe();
        info!("integration loop running");

        while self.state() == WorkerState::Running {
            let request = tokio::select! {
                biased;
                _ = stop_requested(&mut state) => break,
                request = self.mailbox.wait_for_next() => Some(request),
                _ = tokio::time::sleep(self.poll_delay()) => self.poll_trigger(),
            };

            if let Some(request) = request {
                self.run_request(request, &mut state).await;
            }
        }

        info!("integration loop exited");
    }

    fn poll_trigger(&self) -> Option<IntegrationRequest> {
        panic::catch_unwind(AssertUnwindSafe(|| self.trigger.fire())).unwrap_or_else(|payload| {
            error!(panic = %panic_message(&*payload), "trigger panicked while firing");
            None
        })
    }

    fn complete_trigger(&self) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.trigger.integration_completed())) {
            error!(panic = %panic_message(&*payload), "trigger panicked on completion");
        }
    }

    fn next_build(&self) -> Option<DateTime<Utc>> {
        panic::catch_unwind(AssertUnwindSafe(|| self.trigger.next_build()))
            .ok()
            .flatten()
    }

    fn poll_delay(&self) -> Duration {
        let mut delay = self.executor.settings().poll_interval();
        if let Some(next) = self.next_build() {
            let until = (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            delay = delay.min(until);
        }
        delay.max(MIN_POLL)
    }

    /// Queue `request` and run it, along with anything posted while waiting.
    async fn run_request(
        self: &Arc<Self>,
        request: IntegrationRequest,
        state: &mut watch::Receiver<WorkerState>,
    ) {
        let mut waiting = VecDeque::new();
        self.admit(request, &mut waiting);

        loop {
            let wake = {
                let Some(front) = waiting.front_mut() else {
                    return;
                };
                tokio::select! {
                    biased;
                    _ = stop_requested(state) => Wake::Stop,
                    granted = &mut front.admission.granted => Wake::Granted(granted.is_ok()),
                    request = self.mailbox.wait_for_next() => Wake::Posted(request),
                }
            };

            match wake {
                Wake::Stop => {
                    for ticket in waiting {
                        self.queue.remove_item(ticket.admission.id);
                    }
                    debug!("stopped while queued");
                    return;
                }
                Wake::Posted(request) => self.admit(request, &mut waiting),
                Wake::Granted(granted) => {
                    let Some(ticket) = waiting.pop_front() else {
                        return;
                    };
                    if !granted || !self.queue.begin(ticket.admission.id) {
                        debug!("request replaced or cancelled before it ran");
                        continue;
                    }
                    self.run_granted(&ticket.request).await;
                }
            }
        }
    }

    /// Hand a request to the queue. No-build requests and requests the
    /// duplicate policy rejects go no further.
    fn admit(self: &Arc<Self>, request: IntegrationRequest, waiting: &mut VecDeque<Ticket>) {
        if !request.condition().wants_build() {
            return;
        }
        let listener: Arc<dyn QueueListener> = Arc::clone(self) as Arc<dyn QueueListener>;
        let item = QueuedItem::new(Arc::clone(&self.executor), request.clone(), listener);
        match self.queue.enqueue(item) {
            Some(admission) => waiting.push_back(Ticket { request, admission }),
            None => debug!("request dropped by the queue's duplicate policy"),
        }
    }

    /// Run an integration that holds the queue slot, then give the slot back.
    async fn run_granted(&self, request: &IntegrationRequest) {
        if let Err(payload) = AssertUnwindSafe(self.integrate(request)).catch_unwind().await {
            error!(panic = %panic_message(&*payload), "integration panicked");
            *self.current.lock() = CurrentBuild::default();
            self.raise(EventKind::IntegrationCompleted, request, IntegrationStatus::Exception, None);
        }

        self.queue.dequeue();
        self.complete_trigger();
    }

    async fn integrate(&self, request: &IntegrationRequest) {
        let cancel = self.run.lock().cancel.child_token();
        self.current.lock().cancel = Some(cancel.clone());

        info!(condition = ?request.condition(), source = request.source(), "integration started");
        self.raise(EventKind::IntegrationStarted, request, IntegrationStatus::Unknown, None);

        let (status, label) = match self.continuity.start_new_integration(request).await {
            Ok(mut result) => {
                let outcome = AssertUnwindSafe(self.execute(&mut result, request, &cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(BuildError::Execution(format!(
                            "build panicked: {}",
                            panic_message(&*payload)
                        )))
                    });
                self.settle(result, outcome).await
            }
            Err(e) => {
                error!(error = %e, "cannot load the previous result");
                (IntegrationStatus::Exception, None)
            }
        };

        *self.current.lock() = CurrentBuild::default();
        self.raise(EventKind::IntegrationCompleted, request, status, label);
    }

    /// Check modifications, then build when the result says so.
    ///
    /// Returns whether a build ran.
    async fn execute(
        &self,
        result: &mut IntegrationResult,
        request: &IntegrationRequest,
        cancel: &CancellationToken,
    ) -> Result<bool, BuildError> {
        self.set_activity(ProjectActivity::CheckingModifications);
        self.fetch_modifications(result, request, cancel).await?;
        if !result.should_build() {
            return Ok(false);
        }

        self.set_activity(ProjectActivity::Building);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
            built = self.executor.integrate(result, cancel.clone()) => built.map(|()| true),
        }
    }

    async fn fetch_modifications(
        &self,
        result: &mut IntegrationResult,
        request: &IntegrationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        let max_retries = self.executor.max_source_control_retries();
        let handling = self.executor.source_control_error_handling();
        let mut failures = 0u32;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(BuildError::Cancelled),
                fetched = self.executor.fetch_modifications(result) => fetched,
            };
            let err = match fetched {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Transient => e,
                Err(e) => return Err(e),
            };

            failures += 1;
            if failures > max_retries {
                error!(failures, error = %err, "source control retries exhausted");
                return Err(err);
            }
            warn!(failures, max_retries, error = %err, "source control failure, retrying");
            if handling == ErrorHandling::ReportEveryFailure {
                self.raise(EventKind::IntegrationCompleted, request, IntegrationStatus::Exception, None);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                _ = tokio::time::sleep(self.retry.next_delay(failures)) => {}
            }
        }
    }

    /// Turn the build outcome into a final status and persist the result.
    ///
    /// Source-control failures and skipped builds leave continuity untouched.
    async fn settle(
        &self,
        mut result: IntegrationResult,
        outcome: Result<bool, BuildError>,
    ) -> (IntegrationStatus, Option<String>) {
        match outcome {
            Ok(false) => {
                debug!("no modifications, nothing to build");
                return (IntegrationStatus::Unknown, None);
            }
            Ok(true) => {
                if result.status == IntegrationStatus::Unknown {
                    result.status = IntegrationStatus::Success;
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::Transient => return (IntegrationStatus::Exception, None),
                ErrorKind::Cancelled => {
                    info!("integration cancelled");
                    result.status = IntegrationStatus::Cancelled;
                }
                ErrorKind::Permanent => {
                    error!(error = %err, "integration raised an exception");
                    result.mark_exception(err.to_string());
                }
            },
        }

        let label = result.label.clone();
        match self.continuity.finish_integration(result).await {
            Ok(finished) => {
                info!(status = ?finished.status, label = %finished.label, "integration completed");
                self.record_breakers(&finished);
                (finished.status, Some(finished.label))
            }
            Err(e) => {
                error!(error = %e, "cannot save the integration result");
                (IntegrationStatus::Exception, Some(label))
            }
        }
    }

    /// Keep the Breakers / FailingTasks messages in step with the last result.
    fn record_breakers(&self, result: &IntegrationResult) {
        if result.status == IntegrationStatus::Cancelled {
            return;
        }
        self.messages
            .lock()
            .retain(|m| !matches!(m.kind, MessageKind::Breakers | MessageKind::FailingTasks));
        if !result.failure_users.is_empty() {
            self.send_message(
                Message::new(format!("Breakers: {}", result.failure_users.join(", ")))
                    .with_kind(MessageKind::Breakers),
            );
        }
        if !result.failure_tasks.is_empty() {
            self.send_message(
                Message::new(format!("Failing tasks: {}", result.failure_tasks.join(", ")))
                    .with_kind(MessageKind::FailingTasks),
            );
        }
    }

    fn set_activity(&self, activity: ProjectActivity) {
        self.current.lock().activity = Some(activity);
    }

    fn raise(
        &self,
        kind: EventKind,
        request: &IntegrationRequest,
        status: IntegrationStatus,
        label: Option<String>,
    ) {
        self.events.integration_event(IntegrationEvent {
            kind,
            project: self.name().to_string(),
            request: request.clone(),
            status,
            label,
        });
    }
}

impl QueueListener for ProjectWorker {
    fn exiting_queue(&self, cancelled: bool) {
        if cancelled {
            debug!(project = %self.name(), "left the queue without building");
            self.complete_trigger();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn stop_requested(state: &mut watch::Receiver<WorkerState>) {
    let _ = state.wait_for(|s| *s != WorkerState::Running).await;
}
