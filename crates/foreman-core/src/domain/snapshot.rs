//! Read-only views handed to observers.
//!
//! A snapshot is assembled on demand from whatever each component reports at
//! that moment. It is never cached and is not consistent across projects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::BuildCondition;
use super::ids::RequestId;
use super::message::Message;
use super::result::IntegrationStatus;
use super::state::{ProjectActivity, WorkerState};

/// One project's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub queue: String,
    pub queue_priority: u32,
    pub state: WorkerState,
    pub activity: ProjectActivity,
    pub last_build_status: IntegrationStatus,
    pub last_build_label: Option<String>,
    pub last_successful_label: Option<String>,
    pub last_build_at: Option<DateTime<Utc>>,
    pub next_build_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

/// One entry in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequestSnapshot {
    pub id: RequestId,
    pub project: String,
    pub activity: ProjectActivity,
    pub condition: BuildCondition,
    pub source: String,
    pub enqueued_at: DateTime<Utc>,
}

/// One queue, head first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub requests: Vec<QueuedRequestSnapshot>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Aggregate server view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CruiseServerSnapshot {
    pub projects: Vec<ProjectStatus>,
    pub queues: Vec<QueueSnapshot>,
}

impl CruiseServerSnapshot {
    pub fn project(&self, name: &str) -> Option<&ProjectStatus> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSnapshot> {
        self.queues.iter().find(|q| q.name == name)
    }
}
