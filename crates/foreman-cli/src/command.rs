//! A BuildExecutor that runs shell commands.
//!
//! ```toml
//! [projects.executor]
//! command = "cargo test"
//! # optional; one change per stdout line: user<TAB>file<TAB>comment
//! modifications = "scripts/changes-since-last-build"
//! ```

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use foreman_core::config::ProjectSettings;
use foreman_core::domain::{BuildError, IntegrationResult, IntegrationStatus, Modification};
use foreman_core::error::ConfigError;
use foreman_core::ports::{BuildExecutor, Clock, SystemClock};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CommandExecutor {
    settings: ProjectSettings,
    command: String,
    modifications: Option<String>,
}

impl CommandExecutor {
    pub fn new(settings: ProjectSettings) -> Result<Self, ConfigError> {
        let command = settings
            .executor
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("project {}: executor.command is required", settings.name))
            })?
            .to_string();
        let modifications = settings
            .executor
            .get("modifications")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(Self {
            settings,
            command,
            modifications,
        })
    }

    fn shell(&self, line: &str, dir: &Path) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(line)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Parse `user<TAB>file<TAB>comment` lines; blank lines are skipped.
fn parse_modifications(stdout: &str, clock: &dyn Clock) -> Vec<Modification> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, '\t');
            let user = fields.next().unwrap_or_default().trim();
            let file = fields.next().unwrap_or_default().trim();
            let comment = fields.next().unwrap_or_default().trim();
            Modification::new(user, clock.now())
                .with_file(file)
                .with_comment(comment)
        })
        .collect()
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    async fn fetch_modifications(&self, result: &mut IntegrationResult) -> Result<(), BuildError> {
        let Some(line) = &self.modifications else {
            return Ok(());
        };

        tokio::fs::create_dir_all(&result.working_directory)
            .await
            .map_err(|e| BuildError::SourceControl(e.to_string()))?;
        let output = self
            .shell(line, &result.working_directory)
            .output()
            .await
            .map_err(|e| BuildError::SourceControl(e.to_string()))?;
        if !output.status.success() {
            return Err(BuildError::SourceControl(format!(
                "`{line}` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        result.modifications = parse_modifications(&String::from_utf8_lossy(&output.stdout), &SystemClock);
        debug!(count = result.modifications.len(), "modifications found");
        Ok(())
    }

    async fn integrate(
        &self,
        result: &mut IntegrationResult,
        cancel: CancellationToken,
    ) -> Result<(), BuildError> {
        tokio::fs::create_dir_all(&result.working_directory)
            .await
            .map_err(|e| BuildError::Execution(e.to_string()))?;
        let mut child = self
            .shell(&self.command, &result.working_directory)
            .env("FOREMAN_PROJECT", &result.project)
            .env("FOREMAN_LABEL", &result.label)
            .spawn()
            .map_err(|e| BuildError::Execution(e.to_string()))?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| BuildError::Execution(e.to_string()))?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill build");
                }
                return Err(BuildError::Cancelled);
            }
        };

        if status.success() {
            result.status = IntegrationStatus::Success;
        } else {
            result.status = IntegrationStatus::Failure;
            result.failed_tasks = vec![self.command.clone()];
        }
        info!(%status, "build command finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn executor(name: &str, executor: &str) -> CommandExecutor {
        let mut settings = ProjectSettings::new(name);
        settings.executor = toml::from_str(executor).unwrap();
        CommandExecutor::new(settings).unwrap()
    }

    fn result_in(dir: PathBuf) -> IntegrationResult {
        IntegrationResult::initial("api", dir.join("working"), dir.join("artifacts"), SystemClock.now())
    }

    #[test]
    fn command_is_required() {
        let err = CommandExecutor::new(ProjectSettings::new("api")).err().unwrap();
        assert!(err.to_string().contains("executor.command"));
    }

    #[test]
    fn modification_lines_are_tab_separated() {
        let found = parse_modifications("alice\tsrc/lib.rs\tfix parser\n\nbob\n", &SystemClock);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].user, "alice");
        assert_eq!(found[0].file, "src/lib.rs");
        assert_eq!(found[0].comment, "fix parser");
        assert_eq!(found[1].user, "bob");
        assert!(found[1].file.is_empty());
    }

    #[tokio::test]
    async fn exit_status_decides_the_build_status() {
        let dir = tempfile::tempdir().unwrap();

        let mut passed = result_in(dir.path().to_path_buf());
        executor("api", r#"command = "true""#)
            .integrate(&mut passed, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(passed.status, IntegrationStatus::Success);

        let mut failed = result_in(dir.path().to_path_buf());
        executor("api", r#"command = "exit 3""#)
            .integrate(&mut failed, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(failed.status, IntegrationStatus::Failure);
        assert_eq!(failed.failed_tasks, vec!["exit 3"]);
    }

    #[tokio::test]
    async fn cancelled_build_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = result_in(dir.path().to_path_buf());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor("api", r#"command = "sleep 30""#)
            .integrate(&mut result, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[tokio::test]
    async fn failing_modifications_command_is_a_source_control_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = result_in(dir.path().to_path_buf());

        let err = executor("api", "command = \"true\"\nmodifications = \"exit 1\"")
            .fetch_modifications(&mut result)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::SourceControl(_)));
    }

    #[tokio::test]
    async fn no_modifications_command_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = result_in(dir.path().to_path_buf());

        executor("api", r#"command = "true""#)
            .fetch_modifications(&mut result)
            .await
            .unwrap();
        assert!(result.modifications.is_empty());
    }
}
