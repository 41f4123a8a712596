//! Configuration source backed by the TOML file, re-read on every restart.

use std::path::PathBuf;
use std::sync::Arc;

use foreman_core::config::ServerConfig;
use foreman_core::error::ConfigError;
use foreman_core::impls::IntervalTrigger;
use foreman_core::ports::{Clock, Configuration, ConfigurationSource, ProjectDefinition};

use crate::command::CommandExecutor;

pub struct FileConfiguration {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileConfiguration {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }
}

/// One `CommandExecutor` and one `IntervalTrigger` per configured project.
pub fn definitions(config: &ServerConfig, clock: &Arc<dyn Clock>) -> Result<Configuration, ConfigError> {
    let mut projects = Vec::with_capacity(config.projects.len());
    for settings in &config.projects {
        let trigger = IntervalTrigger::new(settings.trigger_interval(), Arc::clone(clock));
        let executor = CommandExecutor::new(settings.clone())?;
        projects.push(ProjectDefinition::new(Arc::new(executor), Arc::new(trigger)));
    }
    Ok(Configuration {
        projects,
        queues: config.queues.clone(),
    })
}

impl ConfigurationSource for FileConfiguration {
    fn load(&self) -> Result<Configuration, ConfigError> {
        let config = ServerConfig::load(&self.path)?;
        definitions(&config, &self.clock)
    }
}
