//! ServerBuilder - wiring and startup validation for an OrchestrationServer.
//!
//! Fail fast: a server that is missing an expected project, or that was given
//! two projects of the same name, is never constructed.

use std::sync::Arc;

use super::{EventBus, OrchestrationServer};
use crate::config::QueueSettings;
use crate::error::ConfigError;
use crate::impls::{InMemoryStateStore, StaticConfiguration};
use crate::ports::{
    Clock, Configuration, ConfigurationSource, ProjectDefinition, ResultContinuityStore,
    SystemClock,
};
use crate::worker::RetryPolicy;

/// # Usage
/// ```ignore
/// let server = ServerBuilder::new()
///     .project(ProjectDefinition::new(executor, trigger))
///     .state_store(Arc::new(FileStateStore::new("state")))
///     .expect_projects(&["alpha"])
///     .build()?;
/// ```
pub struct ServerBuilder {
    name: String,
    source: Option<Arc<dyn ConfigurationSource>>,
    inline: Configuration,
    store: Option<Arc<dyn ResultContinuityStore>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    events: Option<Arc<EventBus>>,
    expected_projects: Option<Vec<String>>,
}

/// Errors from `ServerBuilder::build`.
#[derive(Debug, thiserror::Error)]
pub enum BuildConfigError {
    #[error("Missing projects: {0:?}. These projects were expected but not configured.")]
    MissingProjects(Vec<String>),

    #[error("both a configuration source and inline projects were given")]
    ConflictingSources,

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            name: "foreman".to_string(),
            source: None,
            inline: Configuration::default(),
            store: None,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            events: None,
            expected_projects: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Where the project list comes from, at build time and on every restart.
    pub fn configuration_source(mut self, source: Arc<dyn ConfigurationSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Add a project directly instead of using a configuration source.
    pub fn project(mut self, project: ProjectDefinition) -> Self {
        self.inline.projects.push(project);
        self
    }

    pub fn queue(mut self, settings: QueueSettings) -> Self {
        self.inline.queues.push(settings);
        self
    }

    /// Defaults to an `InMemoryStateStore`.
    pub fn state_store(mut self, store: Arc<dyn ResultContinuityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Projects that must be present in the loaded configuration.
    pub fn expect_projects(mut self, projects: &[&str]) -> Self {
        self.expected_projects = Some(projects.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Load and check the configuration, then wire the server.
    ///
    /// # Checks
    /// - inline projects and a configuration source are mutually exclusive
    /// - project names are unique
    /// - every expected project is configured
    pub fn build(self) -> Result<OrchestrationServer, BuildConfigError> {
        let source: Arc<dyn ConfigurationSource> = match self.source {
            Some(_) if !self.inline.projects.is_empty() || !self.inline.queues.is_empty() => {
                return Err(BuildConfigError::ConflictingSources);
            }
            Some(source) => source,
            None => Arc::new(StaticConfiguration::new(self.inline)),
        };

        let configuration = source.load()?;
        configuration.validate()?;

        if let Some(expected) = &self.expected_projects {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !configuration.projects.iter().any(|p| p.name() == name.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildConfigError::MissingProjects(missing));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let events = self.events.unwrap_or_default();

        Ok(OrchestrationServer::new(
            self.name,
            source,
            configuration,
            store,
            self.clock,
            self.retry,
            events,
        )?)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
