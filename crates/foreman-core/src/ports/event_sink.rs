//! EventSink port - where workers report integration progress.

use crate::domain::IntegrationEvent;

/// Receives IntegrationStarted / IntegrationCompleted events.
///
/// Called synchronously from the worker loop; implementations must not block.
/// The server's event bus is the production sink.
pub trait EventSink: Send + Sync {
    fn integration_event(&self, event: IntegrationEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn integration_event(&self, _event: IntegrationEvent) {}
}
