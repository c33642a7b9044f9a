//! Event sinks
//!
//! An [`EventPublisher`] is where dispatched events finally go: the AMQP broker in
//! production, the log when no broker is configured, or memory in tests.

use crate::error::Result;
use crate::types::{MatchFormed, QueueEvent, QueueSizeChanged, RankChanged};
use async_trait::async_trait;
use tracing::info;

/// Trait for publishing queue and match events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a RankChanged event
    async fn publish_rank_changed(&self, event: RankChanged) -> Result<()>;

    /// Publish a QueueSizeChanged event
    async fn publish_queue_size_changed(&self, event: QueueSizeChanged) -> Result<()>;

    /// Publish a MatchFormed event
    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()>;

    /// Route any event to the matching method
    async fn publish(&self, event: QueueEvent) -> Result<()> {
        match event {
            QueueEvent::RankChanged(e) => self.publish_rank_changed(e).await,
            QueueEvent::QueueSizeChanged(e) => self.publish_queue_size_changed(e).await,
            QueueEvent::MatchFormed(e) => self.publish_match_formed(e).await,
        }
    }
}

/// Sink that writes every event to the log
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_rank_changed(&self, event: RankChanged) -> Result<()> {
        info!(
            "RankChanged - customer: '{}', rank: {}",
            event.customer_id, event.rank
        );
        Ok(())
    }

    async fn publish_queue_size_changed(&self, event: QueueSizeChanged) -> Result<()> {
        info!(
            "QueueSizeChanged - normal: {}, priority: {}, total: {}",
            event.normal_size, event.priority_size, event.total_waiting
        );
        Ok(())
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        info!(
            "MatchFormed - customer: '{}', counselor: {}, session: {}",
            event.customer_id, event.counselor_id, event.session_token
        );
        Ok(())
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<QueueEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<QueueEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published MatchFormed events only
    pub fn matches(&self) -> Vec<MatchFormed> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                QueueEvent::MatchFormed(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: QueueEvent) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_rank_changed(&self, event: RankChanged) -> Result<()> {
        self.record(QueueEvent::RankChanged(event));
        Ok(())
    }

    async fn publish_queue_size_changed(&self, event: QueueSizeChanged) -> Result<()> {
        self.record(QueueEvent::QueueSizeChanged(event));
        Ok(())
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        self.record(QueueEvent::MatchFormed(event));
        Ok(())
    }
}
