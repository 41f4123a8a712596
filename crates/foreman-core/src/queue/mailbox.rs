//! RequestMailbox: single-slot, priority-collapsing inbox.
//!
//! # Cancel safety
//! `wait_for_next` checks the slot before awaiting, so dropping it inside a
//! `select!` never loses a posted request.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::IntegrationRequest;

/// Holds at most one request: the strongest one posted since the last take.
///
/// Bursts of posts collapse to one request. A post replaces the held request
/// only when its `BuildCondition` is strictly stronger, so a force build can
/// never be lost behind a weaker request, and equal requests keep the first.
#[derive(Debug, Default)]
pub struct RequestMailbox {
    slot: Mutex<Option<IntegrationRequest>>,
    notify: Notify,
}

impl RequestMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a request. Returns whether it is now the held one.
    pub fn post(&self, request: IntegrationRequest) -> bool {
        let accepted = {
            let mut slot = self.slot.lock();
            let replace = match slot.as_ref() {
                Some(held) => request.condition() > held.condition(),
                None => true,
            };
            if replace {
                *slot = Some(request);
            }
            replace
        };

        // notify_one stores a permit, so a waiter arriving later still wakes
        self.notify.notify_one();
        accepted
    }

    /// Wait until a request is held, then take it.
    pub async fn wait_for_next(&self) -> IntegrationRequest {
        loop {
            if let Some(request) = self.take() {
                return request;
            }
            self.notify.notified().await;
        }
    }

    /// Take the held request without waiting.
    pub fn take(&self) -> Option<IntegrationRequest> {
        self.slot.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop whatever is held. Returns whether something was dropped.
    pub fn clear(&self) -> bool {
        self.take().is_some()
    }
}
