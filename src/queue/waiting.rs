//! Two-tier waiting queue
//!
//! Customers wait in one of two ordered sets, PRIORITY and NORMAL, scored by
//! enqueue time. The logical queue is PRIORITY followed by NORMAL, and ranks are
//! 1-indexed positions in that concatenation. A customer is in at most one of
//! the two sets at any time; every write below goes through a store operation
//! that keeps it that way.

use crate::error::{MatchmakingError, Result};
use crate::store::{ScoredMember, Store};
use crate::types::{CustomerId, QueueKind, QueueSizes, QueueStatus, WaitingEntry};
use crate::utils::ScoreClock;
use std::sync::Arc;
use tracing::debug;

/// Attempts before giving up on an enqueue that keeps racing a removal
const ENQUEUE_ATTEMPTS: usize = 3;

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub rank: u64,
    pub queue_kind: QueueKind,
    /// False when the customer was already waiting
    pub newly_enqueued: bool,
}

/// Ordered two-tier queue backed by a [`Store`]
pub struct WaitingQueueStore {
    store: Arc<dyn Store>,
    clock: ScoreClock,
}

impl WaitingQueueStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: ScoreClock::new(),
        }
    }

    /// Add a customer to the NORMAL queue unless they are already waiting.
    ///
    /// Idempotent: an already-queued customer keeps their position and gets their
    /// current rank back.
    pub async fn enqueue(&self, customer_id: &str) -> Result<EnqueueOutcome> {
        if customer_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Customer ID cannot be empty".to_string(),
            }
            .into());
        }

        for _ in 0..ENQUEUE_ATTEMPTS {
            let score = self.clock.next();
            let newly_enqueued = self
                .store
                .zadd_nx_exclusive(
                    QueueKind::Normal.store_key(),
                    customer_id,
                    score,
                    &[QueueKind::Priority.store_key()],
                )
                .await?;

            // A concurrent cancel or pop can remove the entry between the two calls
            if let Some(status) = self.status(customer_id).await? {
                debug!(
                    "Enqueued customer '{}' (new: {}) at rank {} in {}",
                    customer_id, newly_enqueued, status.rank, status.queue_kind
                );
                return Ok(EnqueueOutcome {
                    rank: status.rank,
                    queue_kind: status.queue_kind,
                    newly_enqueued,
                });
            }
        }

        Err(MatchmakingError::InternalError {
            message: format!(
                "Customer '{}' kept disappearing from the queue during enqueue",
                customer_id
            ),
        }
        .into())
    }

    /// Which queue holds the customer, if any
    pub async fn queue_kind(&self, customer_id: &str) -> Result<Option<QueueKind>> {
        Ok(self.entry(customer_id).await?.map(|e| e.queue_kind))
    }

    /// The customer's entry with its score, if waiting
    pub async fn entry(&self, customer_id: &str) -> Result<Option<WaitingEntry>> {
        for kind in [QueueKind::Priority, QueueKind::Normal] {
            if let Some(score) = self.store.zscore(kind.store_key(), customer_id).await? {
                return Ok(Some(WaitingEntry::new(customer_id, score, kind)));
            }
        }
        Ok(None)
    }

    /// 1-indexed rank across PRIORITY ++ NORMAL
    pub async fn rank(&self, customer_id: &str) -> Result<Option<u64>> {
        Ok(self.status(customer_id).await?.map(|s| s.rank))
    }

    /// Rank and queue of a waiting customer
    pub async fn status(&self, customer_id: &str) -> Result<Option<QueueStatus>> {
        if let Some(position) = self
            .store
            .zrank(QueueKind::Priority.store_key(), customer_id)
            .await?
        {
            return Ok(Some(QueueStatus::new(
                customer_id,
                position as u64 + 1,
                QueueKind::Priority,
            )));
        }

        if let Some(position) = self
            .store
            .zrank(QueueKind::Normal.store_key(), customer_id)
            .await?
        {
            let priority_size = self.store.zcard(QueueKind::Priority.store_key()).await?;
            return Ok(Some(QueueStatus::new(
                customer_id,
                (priority_size + position) as u64 + 1,
                QueueKind::Normal,
            )));
        }

        Ok(None)
    }

    /// Move a NORMAL customer to PRIORITY, keeping their original score
    pub async fn promote(&self, customer_id: &str) -> Result<bool> {
        self.store
            .zmove(
                QueueKind::Normal.store_key(),
                QueueKind::Priority.store_key(),
                customer_id,
            )
            .await
    }

    /// Remove the customer from whichever queue holds them
    pub async fn remove(&self, customer_id: &str) -> Result<bool> {
        let from_priority = self
            .store
            .zrem(QueueKind::Priority.store_key(), customer_id)
            .await?;
        let from_normal = self
            .store
            .zrem(QueueKind::Normal.store_key(), customer_id)
            .await?;
        Ok(from_priority || from_normal)
    }

    /// Lowest-score entry of a queue without removing it
    pub async fn peek_head(&self, kind: QueueKind) -> Result<Option<WaitingEntry>> {
        let head = self.store.zrange(kind.store_key(), 0, Some(1)).await?;
        Ok(head
            .into_iter()
            .next()
            .map(|m| WaitingEntry::new(m.member, m.score, kind)))
    }

    /// Remove and return the lowest-score entry of a queue
    pub async fn pop_head(&self, kind: QueueKind) -> Result<Option<WaitingEntry>> {
        let head = self.store.zpopmin(kind.store_key()).await?;
        Ok(head.map(|m| WaitingEntry::new(m.member, m.score, kind)))
    }

    pub async fn sizes(&self) -> Result<QueueSizes> {
        let priority = self.store.zcard(QueueKind::Priority.store_key()).await?;
        let normal = self.store.zcard(QueueKind::Normal.store_key()).await?;
        Ok(QueueSizes { normal, priority })
    }

    /// Every waiting customer at rank `from` or later, in rank order
    pub async fn customers_from_rank(&self, from: u64) -> Result<Vec<(CustomerId, u64)>> {
        let from = from.max(1);
        let priority = self
            .store
            .zrange(QueueKind::Priority.store_key(), 0, None)
            .await?;
        let priority_size = priority.len() as u64;

        let mut ranked: Vec<(CustomerId, u64)> = priority
            .into_iter()
            .enumerate()
            .map(|(i, m)| (m.member, i as u64 + 1))
            .filter(|(_, rank)| *rank >= from)
            .collect();

        let normal_offset = from.saturating_sub(priority_size + 1) as usize;
        let normal = self
            .store
            .zrange(QueueKind::Normal.store_key(), normal_offset, None)
            .await?;
        ranked.extend(
            normal
                .into_iter()
                .enumerate()
                .map(|(i, m)| (m.member, priority_size + (normal_offset + i) as u64 + 1)),
        );

        Ok(ranked)
    }

    /// Put entries into `kind` at their original scores in one step, taking each
    /// out of the other queue first
    pub async fn restore(&self, kind: QueueKind, entries: &[WaitingEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let members: Vec<ScoredMember> = entries
            .iter()
            .map(|e| ScoredMember::new(e.customer_id.clone(), e.enqueue_score))
            .collect();
        self.store
            .zrestore(kind.store_key(), &members, &[kind.other().store_key()])
            .await
    }
}
