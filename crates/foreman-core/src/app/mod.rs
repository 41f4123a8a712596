//! App - the server layer, built from the ports.
//!
//! # Components
//! - **ServerBuilder**: wiring and fail-fast validation
//! - **OrchestrationServer**: fleet lifecycle and project commands
//! - **EventBus**: received/processed and integration callbacks
//! - **ResultContinuityManager**: label and failure bookkeeping between builds

pub mod builder;
pub mod continuity;
pub mod events;
pub mod server;

pub use self::builder::{BuildConfigError, ServerBuilder};
pub use self::continuity::ResultContinuityManager;
pub use self::events::EventBus;
pub use self::server::OrchestrationServer;
