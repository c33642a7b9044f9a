//! Counsel Match - queueing and matching service for counseling sessions
//!
//! Waiting customers hold a TTL lease while queued in a PRIORITY or NORMAL
//! queue; a periodic scheduler pairs the head of the queue with the best
//! available counselor and announces queue and match events.

pub mod amqp;
pub mod config;
pub mod error;
pub mod events;
pub mod matching;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use events::{EventBus, EventPublisher};
pub use matching::{MatchMaker, MatchScheduler};
pub use queue::QueueService;
pub use store::{InMemoryStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
