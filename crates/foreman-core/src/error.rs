use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously to callers of the server API.
#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("project not found: {0}")]
    UnknownProject(String),

    #[error("queue not found: {0}")]
    UnknownQueue(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Errors returned by a single project worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("project {0} is stopping and does not accept requests")]
    Stopping(String),
}

/// Errors from a result store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no saved state for project {0}")]
    Missing(String),

    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state for project {project} is unreadable: {source}")]
    Corrupt {
        project: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate project name: {0}")]
    DuplicateProject(String),

    #[error("{0}")]
    Invalid(String),
}
