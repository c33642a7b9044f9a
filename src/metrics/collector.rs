//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the counsel-match service
//! using Prometheus metrics.

use crate::types::{EvictionReason, QueueSizes};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matching service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting queue metrics
    queue_metrics: QueueMetrics,

    /// Matching loop metrics
    matching_metrics: MatchingMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Outbound events by type and outcome
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Waiting queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Current size of each queue
    pub queue_size: IntGaugeVec,

    /// Customers newly added to the queue
    pub enqueued_total: IntCounter,

    /// Customers who left the queue on their own
    pub cancelled_total: IntCounter,

    /// Entries dropped as ghosts, by reason
    pub ghosts_evicted_total: IntCounterVec,

    /// Entries promoted from NORMAL to PRIORITY
    pub customers_promoted_total: IntCounter,
}

/// Matching loop metrics
#[derive(Clone)]
pub struct MatchingMetrics {
    /// Matches committed
    pub matches_total: IntCounter,

    /// Entries skipped because every available counselor was blacklisted
    pub scan_skipped_total: IntCounter,

    /// Counselors currently available and alive
    pub available_counselors: IntGauge,

    /// Scheduler tick duration
    pub tick_duration_seconds: Histogram,

    /// Scheduler ticks that ended in an error
    pub tick_errors_total: IntCounter,

    /// Scans that had to undo their displaced entries
    pub rollbacks_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let matching_metrics = MatchingMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            matching_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get matching metrics
    pub fn matching(&self) -> &MatchingMetrics {
        &self.matching_metrics
    }

    /// Refresh the queue size gauges
    pub fn update_queue_sizes(&self, sizes: QueueSizes) {
        self.queue_metrics
            .queue_size
            .with_label_values(&["normal"])
            .set(sizes.normal as i64);
        self.queue_metrics
            .queue_size
            .with_label_values(&["priority"])
            .set(sizes.priority as i64);
    }

    pub fn record_enqueued(&self) {
        self.queue_metrics.enqueued_total.inc();
    }

    pub fn record_cancelled(&self) {
        self.queue_metrics.cancelled_total.inc();
    }

    /// Record a ghost entry being dropped
    pub fn record_ghost_evicted(&self, reason: EvictionReason) {
        self.queue_metrics
            .ghosts_evicted_total
            .with_label_values(&[reason.label()])
            .inc();
    }

    pub fn record_promoted(&self, count: usize) {
        self.queue_metrics
            .customers_promoted_total
            .inc_by(count as u64);
    }

    pub fn record_skipped(&self, count: usize) {
        self.matching_metrics.scan_skipped_total.inc_by(count as u64);
    }

    pub fn record_match(&self) {
        self.matching_metrics.matches_total.inc();
    }

    pub fn record_rollback(&self) {
        self.matching_metrics.rollbacks_total.inc();
    }

    /// Record a finished scheduler tick
    pub fn record_tick(&self, duration: Duration, success: bool) {
        self.matching_metrics
            .tick_duration_seconds
            .observe(duration.as_secs_f64());
        if !success {
            self.matching_metrics.tick_errors_total.inc();
        }
    }

    pub fn update_available_counselors(&self, count: usize) {
        self.matching_metrics
            .available_counselors
            .set(count as i64);
    }

    /// Record an outbound event publish attempt
    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("counsel_match_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "counsel_match_events_published_total",
                "Outbound events published",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "counsel_match_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("counsel_match_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_size = IntGaugeVec::new(
            Opts::new("counsel_match_queue_size", "Customers waiting per queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_size.clone()))?;

        let enqueued_total = IntCounter::new(
            "counsel_match_enqueued_total",
            "Customers added to the waiting queue",
        )?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let cancelled_total = IntCounter::new(
            "counsel_match_cancelled_total",
            "Customers who cancelled while waiting",
        )?;
        registry.register(Box::new(cancelled_total.clone()))?;

        let ghosts_evicted_total = IntCounterVec::new(
            Opts::new(
                "counsel_match_ghosts_evicted_total",
                "Abandoned entries removed from the queue",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(ghosts_evicted_total.clone()))?;

        let customers_promoted_total = IntCounter::new(
            "counsel_match_customers_promoted_total",
            "Entries promoted to the priority queue",
        )?;
        registry.register(Box::new(customers_promoted_total.clone()))?;

        Ok(Self {
            queue_size,
            enqueued_total,
            cancelled_total,
            ghosts_evicted_total,
            customers_promoted_total,
        })
    }
}

impl MatchingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_total =
            IntCounter::new("counsel_match_matches_total", "Matches committed")?;
        registry.register(Box::new(matches_total.clone()))?;

        let scan_skipped_total = IntCounter::new(
            "counsel_match_scan_skipped_total",
            "Entries skipped for lack of an eligible counselor",
        )?;
        registry.register(Box::new(scan_skipped_total.clone()))?;

        let available_counselors = IntGauge::new(
            "counsel_match_available_counselors",
            "Counselors available for matching",
        )?;
        registry.register(Box::new(available_counselors.clone()))?;

        let tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "counsel_match_tick_duration_seconds",
                "Scheduler tick duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(tick_duration_seconds.clone()))?;

        let tick_errors_total = IntCounter::new(
            "counsel_match_tick_errors_total",
            "Scheduler ticks that failed",
        )?;
        registry.register(Box::new(tick_errors_total.clone()))?;

        let rollbacks_total = IntCounter::new(
            "counsel_match_rollbacks_total",
            "Scans rolled back after a mid-scan failure",
        )?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        Ok(Self {
            matches_total,
            scan_skipped_total,
            available_counselors,
            tick_duration_seconds,
            tick_errors_total,
            rollbacks_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _queue = collector.queue();
        let _matching = collector.matching();
    }

    #[test]
    fn test_queue_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_enqueued();
        collector.record_enqueued();
        collector.record_ghost_evicted(EvictionReason::Stale);
        collector.record_promoted(3);
        collector.update_queue_sizes(QueueSizes {
            normal: 4,
            priority: 1,
        });

        let queue = collector.queue();
        assert_eq!(queue.enqueued_total.get(), 2);
        assert_eq!(queue.customers_promoted_total.get(), 3);
        assert_eq!(
            queue
                .ghosts_evicted_total
                .with_label_values(&["stale"])
                .get(),
            1
        );
        assert_eq!(queue.queue_size.with_label_values(&["normal"]).get(), 4);
    }

    #[test]
    fn test_tick_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_tick(Duration::from_millis(3), true);
        collector.record_tick(Duration::from_millis(4), false);

        let matching = collector.matching();
        assert_eq!(matching.tick_errors_total.get(), 1);
        assert_eq!(matching.tick_duration_seconds.get_sample_count(), 2);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().unwrap();

        collector.update_health_status(2);
        collector.update_component_health("store", true);
        collector.update_component_health("amqp", false);

        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
