//! Queue module: named queues, queued items, the request mailbox, and the
//! registry that ties queues to the workers using them.

mod item;
mod mailbox;
mod named;
mod registry;
mod state;

pub use item::{QueueListener, QueuedItem};
pub use mailbox::RequestMailbox;
pub use named::{Admission, CancelOutcome, NamedQueue};
pub use registry::QueueRegistry;
pub use state::ItemStatus;
