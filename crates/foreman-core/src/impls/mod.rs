//! Impls - reference implementations of the ports.
//!
//! # Included
//! - **InMemoryStateStore**: results kept in a map (tests, throwaway servers)
//! - **FileStateStore**: one JSON file per project
//! - **IntervalTrigger / MultipleTrigger**: time-based triggers
//! - **StaticConfiguration**: an in-memory, replaceable configuration

pub mod file_state;
pub mod inmem_state;
pub mod static_config;
pub mod triggers;

pub use self::file_state::FileStateStore;
pub use self::inmem_state::InMemoryStateStore;
pub use self::static_config::StaticConfiguration;
pub use self::triggers::{IntervalTrigger, MultipleTrigger};
