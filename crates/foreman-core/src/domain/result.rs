//! Integration result: the record of one build attempt.
//!
//! This module only defines the shape of a result. Carrying state from one
//! result to the next is the job of `app::continuity::ResultContinuityManager`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::BuildCondition;
use super::ids::IntegrationId;
use super::request::IntegrationRequest;

/// Label used before any build has produced one.
pub const INITIAL_LABEL: &str = "UNKNOWN";

/// Outcome classification of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegrationStatus {
    #[default]
    Unknown,
    Success,
    Failure,
    Exception,
    Cancelled,
}

impl IntegrationStatus {
    pub fn is_success(self) -> bool {
        self == IntegrationStatus::Success
    }
}

/// A single change picked up from source control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub user: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub file: String,
    pub modified_at: DateTime<Utc>,
}

impl Modification {
    pub fn new(user: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            comment: String::new(),
            file: String::new(),
            modified_at,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Inputs, status and outputs of one integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub id: IntegrationId,
    pub project: String,
    pub label: String,
    pub last_successful_label: Option<String>,
    pub status: IntegrationStatus,
    /// Status of the integration this one was seeded from.
    pub last_integration_status: IntegrationStatus,
    pub condition: BuildCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<IntegrationRequest>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub working_directory: PathBuf,
    pub artifact_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
    /// Users whose changes have been in every build since the last success.
    #[serde(default)]
    pub failure_users: Vec<String>,
    /// Tasks that have failed in every build since the last success.
    #[serde(default)]
    pub failure_tasks: Vec<String>,
    /// Tasks that failed in this build, reported by the executor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl IntegrationResult {
    /// The synthetic result standing in for "no previous build".
    ///
    /// Its condition is `ForceBuild` so that the first build of a project is
    /// always forced.
    pub fn initial(
        project: impl Into<String>,
        working_directory: PathBuf,
        artifact_directory: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IntegrationId::generate(),
            project: project.into(),
            label: INITIAL_LABEL.to_string(),
            last_successful_label: None,
            status: IntegrationStatus::Unknown,
            last_integration_status: IntegrationStatus::Unknown,
            condition: BuildCondition::ForceBuild,
            request: None,
            started_at: now,
            finished_at: None,
            working_directory,
            artifact_directory,
            modifications: Vec::new(),
            failure_users: Vec::new(),
            failure_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            exception: None,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.label == INITIAL_LABEL && self.status == IntegrationStatus::Unknown
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }

    pub fn failed(&self) -> bool {
        self.status == IntegrationStatus::Failure
    }

    pub fn has_modifications(&self) -> bool {
        !self.modifications.is_empty()
    }

    /// Should this integration go ahead and build?
    pub fn should_build(&self) -> bool {
        match self.condition {
            BuildCondition::ForceBuild => true,
            BuildCondition::IfModificationExists => self.has_modifications(),
            BuildCondition::NoBuild => false,
        }
    }

    /// Authors of this build's modifications, first-seen order, no repeats.
    pub fn modification_users(&self) -> Vec<String> {
        let mut users: Vec<String> = Vec::new();
        for m in &self.modifications {
            if !users.contains(&m.user) {
                users.push(m.user.clone());
            }
        }
        users
    }

    pub fn mark_exception(&mut self, message: impl Into<String>) {
        self.status = IntegrationStatus::Exception;
        self.exception = Some(message.into());
    }
}
