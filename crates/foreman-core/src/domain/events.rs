//! Server events.
//!
//! Every project-addressed command raises a cancellable "received" event
//! before it runs and a "processed" event after it ran. Integration events are
//! raised by workers and relayed by the server untouched.

use std::collections::BTreeMap;

use super::message::Message;
use super::request::IntegrationRequest;
use super::result::IntegrationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProjectStarting,
    ProjectStarted,
    ProjectStopping,
    ProjectStopped,
    ForceBuildReceived,
    ForceBuildProcessed,
    AbortBuildReceived,
    AbortBuildProcessed,
    SendMessageReceived,
    SendMessageProcessed,
    CancelPendingReceived,
    CancelPendingProcessed,
    IntegrationStarted,
    IntegrationCompleted,
}

/// A command addressed to one project by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectCommand {
    Start,
    Stop,
    ForceBuild {
        enforcer: String,
        parameters: BTreeMap<String, String>,
    },
    Request(IntegrationRequest),
    AbortBuild {
        enforcer: String,
    },
    SendMessage(Message),
    CancelPending,
}

impl ProjectCommand {
    /// Kind of the cancellable event raised before the command runs.
    pub fn received_kind(&self) -> EventKind {
        match self {
            ProjectCommand::Start => EventKind::ProjectStarting,
            ProjectCommand::Stop => EventKind::ProjectStopping,
            ProjectCommand::ForceBuild { .. } | ProjectCommand::Request(_) => {
                EventKind::ForceBuildReceived
            }
            ProjectCommand::AbortBuild { .. } => EventKind::AbortBuildReceived,
            ProjectCommand::SendMessage(_) => EventKind::SendMessageReceived,
            ProjectCommand::CancelPending => EventKind::CancelPendingReceived,
        }
    }

    /// Kind of the event raised after the command ran.
    pub fn processed_kind(&self) -> EventKind {
        match self {
            ProjectCommand::Start => EventKind::ProjectStarted,
            ProjectCommand::Stop => EventKind::ProjectStopped,
            ProjectCommand::ForceBuild { .. } | ProjectCommand::Request(_) => {
                EventKind::ForceBuildProcessed
            }
            ProjectCommand::AbortBuild { .. } => EventKind::AbortBuildProcessed,
            ProjectCommand::SendMessage(_) => EventKind::SendMessageProcessed,
            ProjectCommand::CancelPending => EventKind::CancelPendingProcessed,
        }
    }
}

/// Payload of received/processed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub kind: EventKind,
    pub project: String,
    pub command: ProjectCommand,
}

/// Answer of a "received" handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Proceed,
    Cancel,
}

/// Payload of integration started/completed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationEvent {
    pub kind: EventKind,
    pub project: String,
    pub request: IntegrationRequest,
    /// `Unknown` on start.
    pub status: IntegrationStatus,
    pub label: Option<String>,
}
