//! EventBus - synchronous callbacks for server and integration events.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{CommandEvent, Disposition, IntegrationEvent};
use crate::ports::EventSink;

type ReceivedHandler = Arc<dyn Fn(&CommandEvent) -> Disposition + Send + Sync>;
type ProcessedHandler = Arc<dyn Fn(&CommandEvent) + Send + Sync>;
type IntegrationHandler = Arc<dyn Fn(&IntegrationEvent) + Send + Sync>;

/// Handlers are invoked in subscription order on the raising thread, with no
/// lock held, so a handler may subscribe further handlers.
#[derive(Default)]
pub struct EventBus {
    received: Mutex<Vec<ReceivedHandler>>,
    processed: Mutex<Vec<ProcessedHandler>>,
    integration: Mutex<Vec<IntegrationHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to "received" events. Returning `Cancel` vetoes the command.
    pub fn on_received(&self, handler: impl Fn(&CommandEvent) -> Disposition + Send + Sync + 'static) {
        self.received.lock().push(Arc::new(handler));
    }

    pub fn on_processed(&self, handler: impl Fn(&CommandEvent) + Send + Sync + 'static) {
        self.processed.lock().push(Arc::new(handler));
    }

    pub fn on_integration(&self, handler: impl Fn(&IntegrationEvent) + Send + Sync + 'static) {
        self.integration.lock().push(Arc::new(handler));
    }

    /// Ask every handler; the first `Cancel` wins and later handlers are
    /// not asked.
    pub fn raise_received(&self, event: &CommandEvent) -> Disposition {
        let handlers = self.received.lock().clone();
        for handler in handlers {
            if handler(event) == Disposition::Cancel {
                return Disposition::Cancel;
            }
        }
        Disposition::Proceed
    }

    pub fn raise_processed(&self, event: &CommandEvent) {
        let handlers = self.processed.lock().clone();
        for handler in handlers {
            handler(event);
        }
    }
}

impl EventSink for EventBus {
    fn integration_event(&self, event: IntegrationEvent) {
        let handlers = self.integration.lock().clone();
        for handler in handlers {
            handler(&event);
        }
    }
}
