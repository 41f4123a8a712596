//! FileStateStore - one JSON file per project.
//!
//! # File format
//!
//! `<dir>/<project>.state.json` holds the serialized `IntegrationResult` of
//! the project's last finished build.
//!
//! # Atomic writes
//!
//! A save writes and fsyncs `<project>.state.json.tmp`, renames it over the
//! old file and fsyncs the directory, so a reader (or a restart after a crash)
//! sees either the previous or the new result.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::IntegrationResult;
use crate::error::StateError;
use crate::ports::ResultContinuityStore;

#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{project}.state.json"))
    }
}

fn io_error(path: &Path, source: io::Error) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write and fsync, so the rename never exposes a half-written file.
async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Persist the rename itself. Directories cannot be opened for sync on
/// Windows, so this is unix-only.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl ResultContinuityStore for FileStateStore {
    async fn has_previous_state(&self, project: &str) -> Result<bool, StateError> {
        let path = self.path_for(project);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn load_state(&self, project: &str) -> Result<IntegrationResult, StateError> {
        let path = self.path_for(project);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StateError::Missing(project.to_string()));
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            project: project.to_string(),
            source,
        })
    }

    async fn save_state(&self, result: &IntegrationResult) -> Result<(), StateError> {
        let path = self.path_for(&result.project);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(result).map_err(|source| StateError::Corrupt {
            project: result.project.clone(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        write_synced(&tmp, &bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        sync_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        debug!(project = %result.project, path = %path.display(), "state saved");
        Ok(())
    }
}
