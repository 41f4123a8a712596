//! InMemoryStateStore - result store for tests and throwaway servers.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::IntegrationResult;
use crate::error::StateError;
use crate::ports::ResultContinuityStore;

/// Keeps the last result of each project in a map.
///
/// # Usage
/// ```ignore
/// let store = Arc::new(InMemoryStateStore::new());
/// let server = ServerBuilder::new().state_store(store).build()?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    results: Mutex<HashMap<String, IntegrationResult>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a previous result, as if an earlier run had saved it.
    pub fn with_result(self, result: IntegrationResult) -> Self {
        self.results.lock().insert(result.project.clone(), result);
        self
    }

    pub fn saved(&self, project: &str) -> Option<IntegrationResult> {
        self.results.lock().get(project).cloned()
    }
}

#[async_trait]
impl ResultContinuityStore for InMemoryStateStore {
    async fn has_previous_state(&self, project: &str) -> Result<bool, StateError> {
        Ok(self.results.lock().contains_key(project))
    }

    async fn load_state(&self, project: &str) -> Result<IntegrationResult, StateError> {
        self.saved(project)
            .ok_or_else(|| StateError::Missing(project.to_string()))
    }

    async fn save_state(&self, result: &IntegrationResult) -> Result<(), StateError> {
        self.results
            .lock()
            .insert(result.project.clone(), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn save_then_load_returns_the_last_result() {
        let store = InMemoryStateStore::new();
        assert!(!store.has_previous_state("alpha").await.unwrap());
        assert!(matches!(
            store.load_state("alpha").await,
            Err(StateError::Missing(_))
        ));

        let mut result = IntegrationResult::initial("alpha", "w".into(), "a".into(), Utc::now());
        result.label = "7".into();
        store.save_state(&result).await.unwrap();

        assert!(store.has_previous_state("alpha").await.unwrap());
        assert_eq!(store.load_state("alpha").await.unwrap().label, "7");
    }
}
