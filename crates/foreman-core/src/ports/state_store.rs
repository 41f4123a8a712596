//! ResultContinuityStore port - last result per project, across restarts.

use async_trait::async_trait;

use crate::domain::IntegrationResult;
use crate::error::StateError;

/// Persists the last known integration result of each project.
///
/// The store is the only owner of result state between process runs; the
/// continuity manager keeps a read-through, write-through copy in memory.
#[async_trait]
pub trait ResultContinuityStore: Send + Sync {
    async fn has_previous_state(&self, project: &str) -> Result<bool, StateError>;

    async fn load_state(&self, project: &str) -> Result<IntegrationResult, StateError>;

    async fn save_state(&self, result: &IntegrationResult) -> Result<(), StateError>;
}
