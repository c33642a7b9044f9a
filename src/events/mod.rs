//! Outbound event plumbing
//!
//! Mutations never wait on event delivery: they push onto an unbounded channel
//! through [`EventBus`], and a dispatcher task drains the channel into the
//! configured [`EventPublisher`].

pub mod publisher;

pub use publisher::{EventPublisher, LoggingEventPublisher, MockEventPublisher};

use crate::metrics::MetricsCollector;
use crate::types::{
    CounselorId, CustomerId, MatchFormed, QueueEvent, QueueSizeChanged, QueueSizes, RankChanged,
    SessionToken,
};
use crate::utils::current_timestamp;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Non-blocking handle for emitting events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<QueueEvent>,
}

impl EventBus {
    /// Create a bus and the receiving end the dispatcher will drain
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue an event for dispatch
    pub fn emit(&self, event: QueueEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!("Event dispatcher has stopped, dropping {} event", name);
        }
    }

    pub fn rank_changed(&self, customer_id: CustomerId, rank: u64) {
        self.emit(QueueEvent::RankChanged(RankChanged {
            customer_id,
            rank,
            timestamp: current_timestamp(),
        }));
    }

    pub fn queue_size_changed(&self, sizes: QueueSizes) {
        self.emit(QueueEvent::QueueSizeChanged(QueueSizeChanged::from_sizes(
            sizes,
            current_timestamp(),
        )));
    }

    /// Emit a MatchFormed event and return the payload that was sent
    pub fn match_formed(
        &self,
        customer_id: CustomerId,
        counselor_id: CounselorId,
        session_token: SessionToken,
    ) -> MatchFormed {
        let event = MatchFormed {
            customer_id,
            counselor_id,
            session_token,
            timestamp: current_timestamp(),
        };
        self.emit(QueueEvent::MatchFormed(event.clone()));
        event
    }
}

/// Drain `receiver` into `publisher` until every bus handle is dropped
pub fn spawn_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<QueueEvent>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Event dispatcher started");

        while let Some(event) = receiver.recv().await {
            let name = event.name();
            let result = publisher.publish(event).await;

            if let Some(metrics) = &metrics {
                metrics.record_event_published(name, result.is_ok());
            }
            if let Err(e) = result {
                warn!("Failed to publish {} event: {}", name, e);
            }
        }

        info!("Event dispatcher stopped");
    })
}
