//! Ports - the collaborators the core depends on.
//!
//! Each trait is a seam to something outside the orchestration core: what a
//! build does, when a trigger fires, where results are kept, what time it is,
//! and where the project list comes from.

pub mod clock;
pub mod config_source;
pub mod event_sink;
pub mod executor;
pub mod state_store;
pub mod trigger;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::config_source::{Configuration, ConfigurationSource, ProjectDefinition};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::executor::BuildExecutor;
pub use self::state_store::ResultContinuityStore;
pub use self::trigger::Trigger;
