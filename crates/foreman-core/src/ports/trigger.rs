//! Trigger port - decides when a project wants a build.

use chrono::{DateTime, Utc};

use crate::domain::IntegrationRequest;

/// A policy object that decides whether a build should be requested.
///
/// `fire` is a non-blocking poll: the worker loop does the waiting, using
/// `next_build` to avoid sleeping past the moment the trigger will fire.
/// Composite triggers surface only their strongest sub-decision.
pub trait Trigger: Send + Sync {
    /// The request to run now, or `None` when no build is due.
    fn fire(&self) -> Option<IntegrationRequest>;

    /// Called after an integration for this project finished (or a pending
    /// one was cancelled) so the trigger can reset its cooldown.
    fn integration_completed(&self);

    /// When the trigger next expects to fire, if it knows.
    fn next_build(&self) -> Option<DateTime<Utc>>;
}
