//! Queue change notifications
//!
//! After a mutation, waiting customers need their new rank and everyone needs
//! the new queue sizes. Reads here are advisory and failures are only logged:
//! a missed notification is corrected by the next one.

use crate::events::EventBus;
use crate::metrics::MetricsCollector;
use crate::queue::WaitingQueueStore;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct QueueNotifier {
    queue: Arc<WaitingQueueStore>,
    events: EventBus,
    metrics: Option<Arc<MetricsCollector>>,
}

impl QueueNotifier {
    pub fn new(queue: Arc<WaitingQueueStore>, events: EventBus) -> Self {
        Self {
            queue,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Broadcast the current queue sizes
    pub async fn publish_sizes(&self) {
        match self.queue.sizes().await {
            Ok(sizes) => {
                if let Some(metrics) = &self.metrics {
                    metrics.update_queue_sizes(sizes);
                }
                self.events.queue_size_changed(sizes);
            }
            Err(e) => warn!("Failed to read queue sizes for notification: {}", e),
        }
    }

    /// Send every customer at rank `from` or later their current rank
    pub async fn notify_from_rank(&self, from: u64) {
        match self.queue.customers_from_rank(from).await {
            Ok(customers) => {
                debug!(
                    "Notifying {} customers of rank changes from rank {}",
                    customers.len(),
                    from
                );
                for (customer_id, rank) in customers {
                    self.events.rank_changed(customer_id, rank);
                }
            }
            Err(e) => warn!("Failed to read ranks from {} for notification: {}", from, e),
        }
    }
}
