//! ResultContinuityManager - carries labels and failure bookkeeping from one
//! build to the next.
//!
//! # Lifecycle
//! 1. `start_new_integration` seeds a result from the last finished one.
//! 2. The worker fills it in while the build runs.
//! 3. `finish_integration` persists it and makes it the new "last".
//!
//! A project with no stored history starts from an initial result, which
//! forces its first build.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{
    BuildCondition, IntegrationId, IntegrationRequest, IntegrationResult, IntegrationStatus,
};
use crate::error::StateError;
use crate::ports::{BuildExecutor, Clock, ResultContinuityStore};

/// One per project. Reads through to the store on first use, then keeps the
/// last finished result in memory and writes every new one through.
pub struct ResultContinuityManager {
    project: String,
    working_directory: PathBuf,
    artifact_directory: PathBuf,
    store: Arc<dyn ResultContinuityStore>,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<IntegrationResult>>,
}

impl ResultContinuityManager {
    pub fn new(
        project: &dyn BuildExecutor,
        store: Arc<dyn ResultContinuityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            project: project.name().to_string(),
            working_directory: project.working_directory(),
            artifact_directory: project.artifact_directory(),
            store,
            clock,
            last: Mutex::new(None),
        }
    }

    /// The last finished result, or the synthetic initial one.
    pub async fn last_integration_result(&self) -> Result<IntegrationResult, StateError> {
        if let Some(last) = self.last.lock().clone() {
            return Ok(last);
        }

        let loaded = if self.store.has_previous_state(&self.project).await? {
            self.store.load_state(&self.project).await?
        } else {
            debug!(project = %self.project, "no previous state");
            IntegrationResult::initial(
                &self.project,
                self.working_directory.clone(),
                self.artifact_directory.clone(),
                self.clock.now(),
            )
        };

        *self.last.lock() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Cached last result without touching the store.
    pub fn cached(&self) -> Option<IntegrationResult> {
        self.last.lock().clone()
    }

    /// A fresh result for `request`, seeded from the last one.
    ///
    /// A project without history always gets a forced first build. Failure
    /// users and tasks carry over until a build succeeds.
    pub async fn start_new_integration(
        &self,
        request: &IntegrationRequest,
    ) -> Result<IntegrationResult, StateError> {
        let last = self.last_integration_result().await?;

        let condition = if last.is_initial() {
            BuildCondition::ForceBuild
        } else {
            request.condition()
        };
        let last_successful_label = if last.succeeded() {
            Some(last.label.clone())
        } else {
            last.last_successful_label.clone()
        };
        let (failure_users, failure_tasks) = if last.succeeded() {
            (Vec::new(), Vec::new())
        } else {
            (last.failure_users.clone(), last.failure_tasks.clone())
        };

        Ok(IntegrationResult {
            id: IntegrationId::generate(),
            project: self.project.clone(),
            label: last.label.clone(),
            last_successful_label,
            status: IntegrationStatus::Unknown,
            last_integration_status: last.status,
            condition,
            request: Some(request.clone()),
            started_at: self.clock.now(),
            finished_at: None,
            working_directory: self.working_directory.clone(),
            artifact_directory: self.artifact_directory.clone(),
            modifications: Vec::new(),
            failure_users,
            failure_tasks,
            failed_tasks: Vec::new(),
            exception: None,
        })
    }

    /// Settle the failure bookkeeping of `result`, then persist and cache it.
    ///
    /// Cancelled results are dropped: the next build continues from the
    /// previous result as if this one never ran.
    pub async fn finish_integration(
        &self,
        mut result: IntegrationResult,
    ) -> Result<IntegrationResult, StateError> {
        result.finished_at = Some(self.clock.now());

        match result.status {
            IntegrationStatus::Cancelled => {
                debug!(project = %self.project, "cancelled result not saved");
                return Ok(result);
            }
            IntegrationStatus::Success => {
                result.failure_users.clear();
                result.failure_tasks.clear();
            }
            IntegrationStatus::Failure => {
                for user in result.modification_users() {
                    push_unique(&mut result.failure_users, user);
                }
                for task in result.failed_tasks.clone() {
                    push_unique(&mut result.failure_tasks, task);
                }
            }
            IntegrationStatus::Exception | IntegrationStatus::Unknown => {}
        }

        self.store.save_state(&result).await?;
        *self.last.lock() = Some(result.clone());
        Ok(result)
    }
}

fn push_unique(into: &mut Vec<String>, value: String) {
    if !into.contains(&value) {
        into.push(value);
    }
}
