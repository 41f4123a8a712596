//! Reference triggers: a fixed interval, and a composite of several.
//!
//! # Time arithmetic
//! Next-build times saturate at `DateTime::<Utc>::MAX_UTC` rather than
//! overflowing, so a huge interval means "practically never".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{BuildCondition, IntegrationRequest};
use crate::ports::{Clock, Trigger};

/// Fires once the interval since the last completed integration has passed.
///
/// A new trigger is due immediately, so a project builds (or checks for
/// modifications) as soon as its worker starts. It stays due until
/// `integration_completed` moves the next build one interval ahead.
pub struct IntervalTrigger {
    interval: chrono::Duration,
    condition: BuildCondition,
    clock: Arc<dyn Clock>,
    next: Mutex<DateTime<Utc>>,
}

impl IntervalTrigger {
    pub const SOURCE: &'static str = "IntervalTrigger";

    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let next = clock.now();
        Self {
            interval: chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX),
            condition: BuildCondition::IfModificationExists,
            clock,
            next: Mutex::new(next),
        }
    }

    pub fn with_condition(mut self, condition: BuildCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Delay the first firing by one interval.
    pub fn skip_initial_build(self) -> Self {
        *self.next.lock() = self.one_interval_from_now();
        self
    }

    /// Saturates at the end of representable time.
    fn one_interval_from_now(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_add_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Trigger for IntervalTrigger {
    fn fire(&self) -> Option<IntegrationRequest> {
        let now = self.clock.now();
        if now < *self.next.lock() {
            return None;
        }
        Some(IntegrationRequest::new(self.condition, Self::SOURCE).with_requested_at(now))
    }

    fn integration_completed(&self) {
        *self.next.lock() = self.one_interval_from_now();
    }

    fn next_build(&self) -> Option<DateTime<Utc>> {
        Some(*self.next.lock())
    }
}

/// Asks every sub-trigger and surfaces the strongest request.
///
/// Ties go to the earlier trigger in the list. Completion is forwarded to all
/// of them; the next build is the earliest any of them reports.
pub struct MultipleTrigger {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl MultipleTrigger {
    pub fn new(triggers: Vec<Arc<dyn Trigger>>) -> Self {
        Self { triggers }
    }
}

impl Trigger for MultipleTrigger {
    fn fire(&self) -> Option<IntegrationRequest> {
        let mut strongest: Option<IntegrationRequest> = None;
        for trigger in &self.triggers {
            let Some(request) = trigger.fire() else {
                continue;
            };
            let stronger = strongest
                .as_ref()
                .is_none_or(|held| request.condition() > held.condition());
            if stronger {
                strongest = Some(request);
            }
        }
        strongest
    }

    fn integration_completed(&self) {
        for trigger in &self.triggers {
            trigger.integration_completed();
        }
    }

    fn next_build(&self) -> Option<DateTime<Utc>> {
        self.triggers.iter().filter_map(|t| t.next_build()).min()
    }
}
