//! Finding the next matchable customer
//!
//! `pop_matchable` pops entries off the queue heads until it finds a customer
//! with at least one eligible counselor:
//!
//! 1. PRIORITY is scanned first. Entries skipped there go back to PRIORITY at
//!    their original score, whether or not the scan finds a match.
//! 2. NORMAL is scanned next. Entries skipped there are promoted to PRIORITY,
//!    since they have now proven unmatchable against the current pool.
//! 3. Entries with a dead lease, or older than the staleness bound, are dropped
//!    along with their lease as ghosts.
//!
//! Every popped-but-undecided entry sits in an undo log until it is put back in
//! one `restore` step. If anything fails mid-scan, the log is replayed into the
//! queues the entries came from before the error propagates.
//!
//! Only one scan runs at a time; the scan guard serialises callers.

use crate::error::{MatchmakingError, Result};
use crate::matching::BlacklistLookup;
use crate::queue::{LeaseRegistry, QueueNotifier, WaitingQueueStore};
use crate::types::{CounselorId, CustomerId, EvictionReason, QueueKind, WaitingEntry};
use crate::utils::{current_timestamp, entry_age_seconds};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of one `pop_matchable` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Matched customer, already removed from the queue
    pub customer_id: Option<CustomerId>,
    /// Entry of the matched customer as it was before the pop
    pub entry: Option<WaitingEntry>,
    /// Available counselors the matched customer has not blocked
    pub eligible_counselor_ids: BTreeSet<CounselorId>,
    /// Entries put back into PRIORITY after the priority scan
    pub skipped_count: usize,
    /// Entries promoted from NORMAL to PRIORITY
    pub moved_count: usize,
    /// Ghost entries dropped during the scan
    pub evicted_count: usize,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.customer_id.is_some()
    }

    fn matched(mut self, entry: WaitingEntry, eligible: BTreeSet<CounselorId>) -> Self {
        self.customer_id = Some(entry.customer_id.clone());
        self.entry = Some(entry);
        self.eligible_counselor_ids = eligible;
        self
    }

    fn changed_queue(&self) -> bool {
        self.is_match() || self.moved_count > 0 || self.evicted_count > 0
    }
}

/// Single-flight scanner over the waiting queue
pub struct MatchMaker {
    queue: Arc<WaitingQueueStore>,
    leases: Arc<LeaseRegistry>,
    blacklist: Arc<dyn BlacklistLookup>,
    notifier: QueueNotifier,
    stale_after: Duration,
    scan_guard: Mutex<()>,
}

impl MatchMaker {
    pub fn new(
        queue: Arc<WaitingQueueStore>,
        leases: Arc<LeaseRegistry>,
        blacklist: Arc<dyn BlacklistLookup>,
        notifier: QueueNotifier,
        stale_after: Duration,
    ) -> Self {
        Self {
            queue,
            leases,
            blacklist,
            notifier,
            stale_after,
            scan_guard: Mutex::new(()),
        }
    }

    /// Pop the next customer that can be matched against `available`.
    ///
    /// With an empty pool nothing is popped and the queues are untouched.
    pub async fn pop_matchable(&self, available: &BTreeSet<CounselorId>) -> Result<MatchResult> {
        if available.is_empty() {
            return Ok(MatchResult::default());
        }

        let _guard = self.scan_guard.lock().await;
        let mut displaced: Vec<WaitingEntry> = Vec::new();

        let result = match self.scan(available, &mut displaced).await {
            Ok(result) => result,
            Err(e) => {
                self.rollback(&mut displaced).await?;
                return Err(e);
            }
        };

        if let Some(metrics) = self.notifier.metrics() {
            metrics.record_promoted(result.moved_count);
        }
        if result.changed_queue() {
            self.notifier.publish_sizes().await;
            self.notifier.notify_from_rank(1).await;
        }

        debug!(
            "Scan finished - matched: {:?}, skipped: {}, moved: {}, evicted: {}",
            result.customer_id, result.skipped_count, result.moved_count, result.evicted_count
        );
        Ok(result)
    }

    async fn scan(
        &self,
        available: &BTreeSet<CounselorId>,
        displaced: &mut Vec<WaitingEntry>,
    ) -> Result<MatchResult> {
        let mut result = MatchResult::default();

        let found = self
            .scan_queue(QueueKind::Priority, available, displaced, &mut result)
            .await?;
        result.skipped_count = displaced.len();
        self.put_back_holding(QueueKind::Priority, displaced, &found)
            .await?;
        if let Some((entry, eligible)) = found {
            return Ok(result.matched(entry, eligible));
        }

        let found = self
            .scan_queue(QueueKind::Normal, available, displaced, &mut result)
            .await?;
        result.moved_count = displaced.len();
        self.put_back_holding(QueueKind::Priority, displaced, &found)
            .await?;
        if result.moved_count > 0 {
            info!(
                "Promoted {} unmatchable customers to the priority queue",
                result.moved_count
            );
        }

        Ok(match found {
            Some((entry, eligible)) => result.matched(entry, eligible),
            None => result,
        })
    }

    /// Pop `kind` until an eligible customer turns up or the queue runs dry.
    /// Skipped entries are left in `displaced`.
    async fn scan_queue(
        &self,
        kind: QueueKind,
        available: &BTreeSet<CounselorId>,
        displaced: &mut Vec<WaitingEntry>,
        result: &mut MatchResult,
    ) -> Result<Option<(WaitingEntry, BTreeSet<CounselorId>)>> {
        while let Some(entry) = self.queue.pop_head(kind).await? {
            // Logged before any check can fail, so rollback sees it
            displaced.push(entry.clone());

            if let Some(reason) = self.ghost_reason(&entry).await? {
                self.leases.delete_by_customer(&entry.customer_id).await?;
                displaced.pop();
                result.evicted_count += 1;
                if let Some(metrics) = self.notifier.metrics() {
                    metrics.record_ghost_evicted(reason);
                }
                warn!(
                    "Evicted ghost customer '{}' from {} queue ({})",
                    entry.customer_id,
                    kind,
                    reason.label()
                );
                continue;
            }

            let blocked = self
                .blacklist
                .blocked_counselors(&entry.customer_id)
                .await
                .map_err(|e| MatchmakingError::CollaboratorFailed {
                    message: format!(
                        "Blacklist lookup for customer '{}' failed: {}",
                        entry.customer_id, e
                    ),
                })?;
            let eligible: BTreeSet<CounselorId> = available
                .iter()
                .filter(|id| !blocked.contains(id))
                .copied()
                .collect();

            if eligible.is_empty() {
                debug!(
                    "Customer '{}' has blocked every available counselor, skipping",
                    entry.customer_id
                );
                if let Some(metrics) = self.notifier.metrics() {
                    metrics.record_skipped(1);
                }
                continue;
            }

            displaced.pop();
            return Ok(Some((entry, eligible)));
        }
        Ok(None)
    }

    async fn ghost_reason(&self, entry: &WaitingEntry) -> Result<Option<EvictionReason>> {
        if !self.leases.is_alive(&entry.customer_id).await? {
            return Ok(Some(EvictionReason::Lease));
        }
        let age = entry_age_seconds(entry.enqueue_score, current_timestamp());
        if age > self.stale_after.as_secs() as i64 {
            return Ok(Some(EvictionReason::Stale));
        }
        Ok(None)
    }

    /// Put every displaced entry into `target` in one step
    async fn put_back(&self, target: QueueKind, displaced: &mut Vec<WaitingEntry>) -> Result<()> {
        if displaced.is_empty() {
            return Ok(());
        }
        self.queue.restore(target, displaced).await?;
        displaced.clear();
        Ok(())
    }

    /// [`Self::put_back`], except that on failure the matched entry joins the
    /// undo log too, so rollback returns it to its queue
    async fn put_back_holding(
        &self,
        target: QueueKind,
        displaced: &mut Vec<WaitingEntry>,
        found: &Option<(WaitingEntry, BTreeSet<CounselorId>)>,
    ) -> Result<()> {
        if let Err(e) = self.put_back(target, displaced).await {
            if let Some((entry, _)) = found {
                displaced.push(entry.clone());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Return displaced entries to the queues they were popped from
    async fn rollback(&self, displaced: &mut Vec<WaitingEntry>) -> Result<()> {
        if displaced.is_empty() {
            return Ok(());
        }
        if let Some(metrics) = self.notifier.metrics() {
            metrics.record_rollback();
        }

        let count = displaced.len();
        for kind in [QueueKind::Priority, QueueKind::Normal] {
            let entries: Vec<WaitingEntry> = displaced
                .iter()
                .filter(|e| e.queue_kind == kind)
                .cloned()
                .collect();
            if let Err(e) = self.queue.restore(kind, &entries).await {
                error!(
                    "Rollback failed, {} displaced customers could not be restored: {}",
                    count, e
                );
                return Err(MatchmakingError::RollbackFailed {
                    entries: count,
                    message: e.to_string(),
                }
                .into());
            }
        }

        warn!("Scan rolled back, {} customers restored", count);
        displaced.clear();
        Ok(())
    }
}
