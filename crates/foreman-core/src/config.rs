//! Server configuration.
//!
//! Settings are plain serde structs so they can come from a TOML file
//! (`ServerConfig::load`) or be built in code (`ProjectSettings::new`).
//!
//! ```toml
//! name = "ci"
//! state_dir = "state"
//!
//! [[projects]]
//! name = "api"
//! queue = "shared-checkout"
//! queue_priority = 1
//! trigger_interval_secs = 30
//!
//! [projects.executor]
//! command = "cargo test"
//!
//! [[queues]]
//! name = "shared-checkout"
//! duplicates = "replace_with_force"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_server_name() -> String {
    "foreman".to_string()
}

fn default_max_source_control_retries() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_trigger_interval_secs() -> u64 {
    60
}

/// How source-control failures are reported while they are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Raise a failed integration for every failed attempt.
    #[default]
    ReportEveryFailure,
    /// Raise one failed integration once the retries are used up.
    ReportOnRetryAmount,
}

/// What a queue does with a second pending request for the same project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Queue it behind the first.
    #[default]
    Allow,
    /// Drop the new request.
    UseFirst,
    /// Drop the new request unless it is a force build and the pending one
    /// is weaker, in which case the pending one is replaced in place.
    ReplaceWithForce,
}

/// Per-project settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,

    /// Queue shared with other projects. Defaults to the project name.
    #[serde(default)]
    pub queue: Option<String>,

    /// 0 means "no priority": appended behind everything else.
    #[serde(default)]
    pub queue_priority: u32,

    #[serde(default = "default_max_source_control_retries")]
    pub max_source_control_retries: u32,

    #[serde(default)]
    pub source_control_error_handling: ErrorHandling,

    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub artifact_directory: Option<PathBuf>,

    /// Upper bound on how long the worker sleeps between trigger polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval of the project's default trigger.
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,

    /// Executor-specific settings, opaque to the core.
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub executor: toml::Table,
}

impl ProjectSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            queue_priority: 0,
            max_source_control_retries: default_max_source_control_retries(),
            source_control_error_handling: ErrorHandling::default(),
            working_directory: None,
            artifact_directory: None,
            poll_interval_ms: default_poll_interval_ms(),
            trigger_interval_secs: default_trigger_interval_secs(),
            executor: toml::Table::new(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_queue_priority(mut self, priority: u32) -> Self {
        self.queue_priority = priority;
        self
    }

    pub fn with_source_control_retries(mut self, retries: u32, handling: ErrorHandling) -> Self {
        self.max_source_control_retries = retries;
        self.source_control_error_handling = handling;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(&self.name)
    }

    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .unwrap_or_else(|| Path::new(&self.name).join("working"))
    }

    pub fn artifact_directory(&self) -> PathBuf {
        self.artifact_directory
            .clone()
            .unwrap_or_else(|| Path::new(&self.name).join("artifacts"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_secs)
    }
}

/// Per-queue settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,

    #[serde(default)]
    pub duplicates: DuplicatePolicy,

    /// Explicit priorities by project name; they override the project's own
    /// `queue_priority` inside this queue.
    #[serde(default)]
    pub priorities: BTreeMap<String, u32>,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn with_priority(mut self, project: impl Into<String>, priority: u32) -> Self {
        self.priorities.insert(project.into(), priority);
        self
    }
}

/// Whole-server configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Directory of the file state store. In-memory state when absent.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub projects: Vec<ProjectSettings>,

    #[serde(default)]
    pub queues: Vec<QueueSettings>,
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.name.trim().is_empty() {
                return Err(ConfigError::Invalid("project name must not be empty".into()));
            }
            if !seen.insert(project.name.as_str()) {
                return Err(ConfigError::DuplicateProject(project.name.clone()));
            }
            if project.poll_interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "project {}: poll_interval_ms must be positive",
                    project.name
                )));
            }
        }

        let mut queues = HashSet::new();
        for queue in &self.queues {
            if !queues.insert(queue.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "queue {} is configured twice",
                    queue.name
                )));
            }
        }
        Ok(())
    }

    pub fn queue_settings(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|q| q.name == name)
    }
}
