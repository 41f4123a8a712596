//! Domain model (conditions, requests, results, states, events, snapshots).

pub mod condition;
pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod request;
pub mod result;
pub mod snapshot;
pub mod state;

pub use self::condition::BuildCondition;
pub use self::errors::{BuildError, ErrorKind};
pub use self::events::{CommandEvent, Disposition, EventKind, IntegrationEvent, ProjectCommand};
pub use self::ids::{IntegrationId, RequestId};
pub use self::message::{Message, MessageKind};
pub use self::request::IntegrationRequest;
pub use self::result::{INITIAL_LABEL, IntegrationResult, IntegrationStatus, Modification};
pub use self::snapshot::{CruiseServerSnapshot, ProjectStatus, QueueSnapshot, QueuedRequestSnapshot};
pub use self::state::{ProjectActivity, WorkerState};
