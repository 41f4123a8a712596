//! foreman-core
//!
//! Scheduling core of a continuous-integration server: decides when each
//! project builds, serializes builds that share a queue, and carries results
//! from one build to the next.
//!
//! # Modules
//! - **domain**: conditions, requests, results, states, events, snapshots
//! - **ports**: the seams to the outside (executor, trigger, store, clock, configuration)
//! - **queue**: named queues, the request mailbox, the queue registry
//! - **worker**: the per-project integration loop
//! - **app**: the server, its builder, events and result continuity
//! - **impls**: reference implementations of the ports
//! - **config**: TOML settings

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{OrchestrationServer, ServerBuilder};
pub use error::ForemanError;
