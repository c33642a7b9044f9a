//! Periodic matching loop
//!
//! Each tick drains as much of the queue as the current counselor pool allows:
//! at most one match per counselor in the pool at the start of the tick, and it
//! stops at the first scan that finds nobody matchable.

use crate::error::{MatchmakingError, Result};
use crate::events::EventBus;
use crate::matching::{
    CounselorAvailabilityRegistry, CounselorScorer, HistoryAggregates, MatchMaker, ScoreInputs,
};
use crate::metrics::MetricsCollector;
use crate::queue::{LeaseRegistry, WaitingQueueStore};
use crate::types::{CounselorId, MatchFormed, QueueKind, WaitingEntry};
use crate::utils::generate_session_token;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub matches: Vec<MatchFormed>,
    pub scans: usize,
    pub skipped: usize,
    pub moved: usize,
    pub evicted: usize,
}

pub struct MatchScheduler {
    availability: Arc<CounselorAvailabilityRegistry>,
    queue: Arc<WaitingQueueStore>,
    leases: Arc<LeaseRegistry>,
    maker: Arc<MatchMaker>,
    scorer: CounselorScorer,
    history: Arc<dyn HistoryAggregates>,
    events: EventBus,
    metrics: Option<Arc<MetricsCollector>>,
    tick_interval: Duration,
    // Pop and commit of one tick must not interleave with another tick
    tick_guard: Mutex<()>,
}

impl MatchScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        availability: Arc<CounselorAvailabilityRegistry>,
        queue: Arc<WaitingQueueStore>,
        leases: Arc<LeaseRegistry>,
        maker: Arc<MatchMaker>,
        scorer: CounselorScorer,
        history: Arc<dyn HistoryAggregates>,
        events: EventBus,
        tick_interval: Duration,
    ) -> Self {
        Self {
            availability,
            queue,
            leases,
            maker,
            scorer,
            history,
            events,
            metrics: None,
            tick_interval,
            tick_guard: Mutex::new(()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one matching pass
    pub async fn run_tick(&self) -> Result<TickReport> {
        let _guard = self.tick_guard.lock().await;
        let mut report = TickReport::default();

        let pool = self.availability.matchable_ids().await?;
        if let Some(metrics) = &self.metrics {
            metrics.update_available_counselors(pool.len());
        }
        if pool.is_empty() {
            return Ok(report);
        }
        if self.queue.sizes().await?.total() == 0 {
            return Ok(report);
        }

        debug!("Matching tick started with {} counselors", pool.len());

        for _ in 0..pool.len() {
            // The pool shrinks as matches commit
            let current = self.availability.matchable_ids().await?;
            if current.is_empty() {
                break;
            }

            let result = self.maker.pop_matchable(&current).await?;
            report.scans += 1;
            report.skipped += result.skipped_count;
            report.moved += result.moved_count;
            report.evicted += result.evicted_count;

            let entry = match result.entry {
                Some(entry) => entry,
                None => break,
            };

            let inputs = match ScoreInputs::gather(
                self.history.as_ref(),
                &entry.customer_id,
                &result.eligible_counselor_ids,
            )
            .await
            {
                Ok(inputs) => inputs,
                Err(e) => {
                    warn!(
                        "History lookup for customer '{}' failed, scoring without it: {}",
                        entry.customer_id, e
                    );
                    ScoreInputs::default()
                }
            };

            let counselor_id = match self.scorer.select_best(
                &entry.customer_id,
                &result.eligible_counselor_ids,
                &inputs,
            ) {
                Some(counselor_id) => counselor_id,
                None => {
                    self.requeue(&entry).await?;
                    break;
                }
            };

            report.matches.push(self.commit(entry, counselor_id).await?);
        }

        if !report.matches.is_empty() || report.evicted > 0 {
            info!(
                "Matching tick finished - matches: {}, skipped: {}, promoted: {}, evicted: {}",
                report.matches.len(),
                report.skipped,
                report.moved,
                report.evicted
            );
        }
        Ok(report)
    }

    /// Make the pairing final and announce it
    async fn commit(&self, entry: WaitingEntry, counselor_id: CounselorId) -> Result<MatchFormed> {
        if let Err(e) = self.availability.set_unavailable(counselor_id).await {
            self.requeue(&entry).await?;
            return Err(e);
        }

        if let Err(e) = self.leases.delete_by_customer(&entry.customer_id).await {
            // The lease will lapse on its own
            warn!(
                "Failed to delete lease of matched customer '{}': {}",
                entry.customer_id, e
            );
        }

        let session_token = generate_session_token(&entry.customer_id, counselor_id);
        let event = self
            .events
            .match_formed(entry.customer_id.clone(), counselor_id, session_token);

        if let Some(metrics) = &self.metrics {
            metrics.record_match();
        }
        info!(
            "Matched customer '{}' with counselor {} (session {})",
            event.customer_id, event.counselor_id, event.session_token
        );
        Ok(event)
    }

    /// Put a popped customer back at the front, keeping their original score
    async fn requeue(&self, entry: &WaitingEntry) -> Result<()> {
        self.queue
            .restore(QueueKind::Priority, std::slice::from_ref(entry))
            .await
            .map_err(|e| {
                error!(
                    "Failed to requeue customer '{}' after aborted match: {}",
                    entry.customer_id, e
                );
                MatchmakingError::RollbackFailed {
                    entries: 1,
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Spawn the fixed-interval loop. Tick errors are logged and the next tick retries.
    pub fn start(self: Arc<Self>, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "Match scheduler started ({}ms interval)",
                self.tick_interval.as_millis()
            );

            while *is_running.read().await {
                interval.tick().await;

                let started = Instant::now();
                let outcome = self.run_tick().await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_tick(started.elapsed(), outcome.is_ok());
                }
                if let Err(e) = outcome {
                    if is_transient_failure(&e) {
                        warn!("Matching tick failed, retrying next tick: {}", e);
                    } else {
                        error!("Matching tick failed, retrying next tick: {}", e);
                    }
                }
            }

            info!("Match scheduler stopped");
        })
    }
}

/// Whether a tick error is expected to clear up by itself
fn is_transient_failure(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::is_transient)
        .unwrap_or(false)
}
