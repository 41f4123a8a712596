//! ConfigurationSource port - produces the set of projects to run.
//!
//! Called once at server construction and again on every restart. Each load
//! yields fresh executors and triggers; the server never reuses old ones.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::QueueSettings;
use crate::error::ConfigError;
use crate::ports::{BuildExecutor, Trigger};

/// One project, ready to be handed to a worker.
#[derive(Clone)]
pub struct ProjectDefinition {
    pub executor: Arc<dyn BuildExecutor>,
    pub trigger: Arc<dyn Trigger>,
}

impl ProjectDefinition {
    pub fn new(executor: Arc<dyn BuildExecutor>, trigger: Arc<dyn Trigger>) -> Self {
        Self { executor, trigger }
    }

    pub fn name(&self) -> &str {
        self.executor.name()
    }
}

/// A loaded configuration.
#[derive(Clone, Default)]
pub struct Configuration {
    pub projects: Vec<ProjectDefinition>,
    pub queues: Vec<QueueSettings>,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for project in &self.projects {
            if !seen.insert(project.name().to_string()) {
                return Err(ConfigError::DuplicateProject(project.name().to_string()));
            }
        }
        Ok(())
    }

    pub fn queue_settings(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|q| q.name == name)
    }
}

pub trait ConfigurationSource: Send + Sync {
    fn load(&self) -> Result<Configuration, ConfigError>;
}
