//! Customer-facing queue operations
//!
//! Everything a waiting customer (or the transport serving them) can do:
//! join, keep alive, leave, and ask where they stand. Apart from `enqueue`,
//! which has to hand back a lease ticket, these never fail outward; store
//! errors are logged and turned into an empty answer.

use crate::error::Result;
use crate::matching::CounselorAvailabilityRegistry;
use crate::queue::{LeaseRegistry, QueueNotifier, WaitingQueueStore};
use crate::types::{
    EnqueueReceipt, EvictionReason, HeartbeatStatus, QueueStatus, SystemStats, MINUTES_PER_RANK,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct QueueService {
    queue: Arc<WaitingQueueStore>,
    leases: Arc<LeaseRegistry>,
    availability: Arc<CounselorAvailabilityRegistry>,
    notifier: QueueNotifier,
}

impl QueueService {
    pub fn new(
        queue: Arc<WaitingQueueStore>,
        leases: Arc<LeaseRegistry>,
        availability: Arc<CounselorAvailabilityRegistry>,
        notifier: QueueNotifier,
    ) -> Self {
        Self {
            queue,
            leases,
            availability,
            notifier,
        }
    }

    /// Join the queue, or re-join with a fresh lease if already waiting
    pub async fn enqueue(&self, customer_id: &str) -> Result<EnqueueReceipt> {
        // Lease first, so a scan never finds the entry without one
        let lease_ticket = self.leases.create(customer_id).await?;

        let outcome = match self.queue.enqueue(customer_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(cleanup) = self.leases.delete(&lease_ticket).await {
                    warn!(
                        "Failed to drop lease of customer '{}' after enqueue error: {}",
                        customer_id, cleanup
                    );
                }
                return Err(e);
            }
        };

        if outcome.newly_enqueued {
            if let Some(metrics) = self.notifier.metrics() {
                metrics.record_enqueued();
            }
            self.notifier.publish_sizes().await;
            info!(
                "Customer '{}' joined the {} queue at rank {}",
                customer_id, outcome.queue_kind, outcome.rank
            );
        } else {
            debug!(
                "Customer '{}' re-joined, keeping rank {}",
                customer_id, outcome.rank
            );
        }

        Ok(EnqueueReceipt {
            customer_id: customer_id.to_string(),
            rank: outcome.rank,
            queue_kind: outcome.queue_kind,
            lease_ticket,
            estimated_wait_minutes: outcome.rank * MINUTES_PER_RANK,
            already_queued: !outcome.newly_enqueued,
        })
    }

    /// Renew a lease; an unknown or expired ticket reports `alive: false`
    pub async fn heartbeat(&self, lease_ticket: &str) -> HeartbeatStatus {
        match self.try_heartbeat(lease_ticket).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                HeartbeatStatus::expired()
            }
        }
    }

    async fn try_heartbeat(&self, lease_ticket: &str) -> Result<HeartbeatStatus> {
        if !self.leases.renew(lease_ticket).await? {
            return Ok(HeartbeatStatus::expired());
        }
        let remaining = self.leases.remaining_ttl(lease_ticket).await?;
        Ok(HeartbeatStatus::renewed(remaining.max(0)))
    }

    /// Leave the queue. Returns false if the customer was neither queued nor
    /// holding a lease.
    ///
    /// A customer popped by an in-flight scan still holds their lease; dropping
    /// it counts as a cancel, and the scan's restore is later evicted as a ghost.
    pub async fn cancel(&self, customer_id: &str) -> bool {
        match self.try_cancel(customer_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cancel for customer '{}' failed: {}", customer_id, e);
                false
            }
        }
    }

    async fn try_cancel(&self, customer_id: &str) -> Result<bool> {
        let rank_before = self.queue.rank(customer_id).await?;
        let removed = self.queue.remove(customer_id).await?;
        let lease_dropped = self.leases.delete_by_customer(customer_id).await?;

        if removed {
            info!("Customer '{}' left the queue", customer_id);
            self.notify_removal(rank_before).await;
        } else if lease_dropped {
            info!(
                "Customer '{}' cancelled while being scanned, lease dropped",
                customer_id
            );
        }

        let cancelled = removed || lease_dropped;
        if cancelled {
            if let Some(metrics) = self.notifier.metrics() {
                metrics.record_cancelled();
            }
        }
        Ok(cancelled)
    }

    /// Current rank of a waiting customer
    pub async fn queue_status(&self, customer_id: &str) -> Option<QueueStatus> {
        match self.queue.status(customer_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Queue status for customer '{}' failed: {}", customer_id, e);
                None
            }
        }
    }

    pub async fn system_stats(&self) -> SystemStats {
        match self.try_system_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("System stats unavailable: {}", e);
                SystemStats::default()
            }
        }
    }

    /// Same counts as [`Self::system_stats`], with store errors surfaced
    pub async fn try_system_stats(&self) -> Result<SystemStats> {
        let sizes = self.queue.sizes().await?;
        let available_counselor_count = self.availability.available_count().await?;
        Ok(SystemStats {
            normal_size: sizes.normal,
            priority_size: sizes.priority,
            total_waiting: sizes.total(),
            available_counselor_count,
        })
    }

    /// Drop a ghost entry and its lease. Safe to call for a customer that is
    /// already gone.
    pub async fn evict_ghost(&self, customer_id: &str, reason: EvictionReason) -> bool {
        match self.try_evict_ghost(customer_id, reason).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Ghost eviction of customer '{}' failed: {}", customer_id, e);
                false
            }
        }
    }

    /// React to a lease expiry signal. A customer who renewed or re-joined since
    /// the signal was raised is left alone.
    pub async fn evict_if_expired(&self, customer_id: &str) -> bool {
        match self.leases.is_alive(customer_id).await {
            Ok(true) => {
                debug!(
                    "Ignoring stale expiry signal for live customer '{}'",
                    customer_id
                );
                false
            }
            Ok(false) => self.evict_ghost(customer_id, EvictionReason::Expired).await,
            Err(e) => {
                warn!(
                    "Liveness check for customer '{}' failed: {}",
                    customer_id, e
                );
                false
            }
        }
    }

    async fn try_evict_ghost(&self, customer_id: &str, reason: EvictionReason) -> Result<bool> {
        let rank_before = self.queue.rank(customer_id).await?;
        let removed = self.queue.remove(customer_id).await?;
        self.leases.delete_by_customer(customer_id).await?;

        if removed {
            if let Some(metrics) = self.notifier.metrics() {
                metrics.record_ghost_evicted(reason);
            }
            warn!(
                "Evicted ghost customer '{}' ({})",
                customer_id,
                reason.label()
            );
            self.notify_removal(rank_before).await;
        }
        Ok(removed)
    }

    async fn notify_removal(&self, rank_before: Option<u64>) {
        self.notifier.publish_sizes().await;
        if let Some(rank) = rank_before {
            self.notifier.notify_from_rank(rank).await;
        }
    }
}
