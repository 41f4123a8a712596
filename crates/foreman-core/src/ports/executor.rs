//! BuildExecutor port - the project abstraction the core schedules.
//!
//! The core never knows what a build does. It only knows how to ask for
//! modifications, run the build, and tell the project where it stands in its
//! queue. Version-control adapters, labellers and publishers all live behind
//! this trait.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ErrorHandling, ProjectSettings};
use crate::domain::{BuildError, IntegrationResult};

#[async_trait]
pub trait BuildExecutor: Send + Sync {
    fn settings(&self) -> &ProjectSettings;

    /// Fill `result.modifications` with changes since the previous build.
    ///
    /// Errors here are source-control errors and are retried per policy.
    async fn fetch_modifications(&self, result: &mut IntegrationResult) -> Result<(), BuildError>;

    /// Run the build, setting `result.status` (and optionally `label`,
    /// `failed_tasks`). An executor that leaves the status `Unknown` is
    /// treated as successful.
    ///
    /// `cancel` fires when the build is aborted; honouring it is best effort.
    async fn integrate(
        &self,
        result: &mut IntegrationResult,
        cancel: CancellationToken,
    ) -> Result<(), BuildError>;

    /// The project entered its queue.
    fn notify_pending_state(&self) {}

    /// The project left its queue with nothing else pending.
    fn notify_sleeping_state(&self) {}

    /// The worker is being aborted; stop anything long-running.
    fn abort(&self) {}

    fn name(&self) -> &str {
        &self.settings().name
    }

    fn queue_name(&self) -> &str {
        self.settings().queue_name()
    }

    fn queue_priority(&self) -> u32 {
        self.settings().queue_priority
    }

    fn max_source_control_retries(&self) -> u32 {
        self.settings().max_source_control_retries
    }

    fn source_control_error_handling(&self) -> ErrorHandling {
        self.settings().source_control_error_handling
    }

    fn working_directory(&self) -> PathBuf {
        self.settings().working_directory()
    }

    fn artifact_directory(&self) -> PathBuf {
        self.settings().artifact_directory()
    }
}
