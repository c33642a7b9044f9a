//! Waiting queue, customer leases and the customer-facing queue surface

pub mod lease;
pub mod notifier;
pub mod reaper;
pub mod service;
pub mod waiting;

pub use lease::LeaseRegistry;
pub use notifier::QueueNotifier;
pub use reaper::{ExpirationListener, ExpiredKey};
pub use service::QueueService;
pub use waiting::{EnqueueOutcome, WaitingQueueStore};
