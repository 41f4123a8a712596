//! Errors raised while a build runs, and how the worker classifies them.

use thiserror::Error;

/// Operational classification of a build error.
///
/// - Transient: retry per the project's source-control policy.
/// - Permanent: record as an `Exception` result and move on.
/// - Cancelled: record as a `Cancelled` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Cancelled,
}

/// Error returned by a `BuildExecutor`.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Inspecting modifications failed.
    #[error("source control error: {0}")]
    SourceControl(String),

    /// The build itself raised an error.
    #[error("build error: {0}")]
    Execution(String),

    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::SourceControl(_) => ErrorKind::Transient,
            BuildError::Execution(_) => ErrorKind::Permanent,
            BuildError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
