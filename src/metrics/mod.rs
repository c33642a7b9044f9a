//! Metrics and monitoring for the counsel-match service
//!
//! Prometheus collection plus the HTTP server exposing health, metrics and
//! the queue API.

pub mod collector;
pub mod health;

pub use collector::{MatchingMetrics, MetricsCollector, QueueMetrics, ServiceMetrics};
pub use health::{HealthServer, HealthServerConfig};

use std::sync::Arc;

/// Unified metrics service that combines all monitoring capabilities
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    /// Get the metrics collector
    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Get the health server
    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve until [`Self::stop`] is called
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    /// Stop the metrics service
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }
}
