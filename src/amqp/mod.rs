//! AMQP integration for the matching service
//!
//! Outbound only: queue and match events are published to a topic exchange.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, PublisherConfig};
