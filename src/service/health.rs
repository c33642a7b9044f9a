//! Health checks for the matching service: readiness and liveness probes
//! plus a detailed report for `/stats`.

use crate::service::app::ServiceContext;
use crate::types::SystemStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value (0=unhealthy, 1=degraded, 2=healthy)
    pub fn as_metric(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Fold a component status into the overall one
    fn combine(self, component: HealthStatus) -> HealthStatus {
        match (self, component) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Queue and counselor counts, zero when the store is unreachable
    pub stats: SystemStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn new(name: &str, status: HealthStatus, message: Option<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl HealthCheck {
    /// Full health report of the service
    pub async fn check(context: &ServiceContext) -> Self {
        let service_check = Self::check_service_running(context).await;
        let (store_check, stats) = Self::check_store(context).await;
        let amqp_check = Self::check_amqp(context);

        // The event sink is fire-and-forget, so a broken broker only degrades
        let amqp_status = match amqp_check.status {
            HealthStatus::Unhealthy => HealthStatus::Degraded,
            other => other,
        };

        let status = service_check
            .status
            .combine(store_check.status)
            .combine(amqp_status);

        HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: context.uptime().as_secs(),
            checks: vec![service_check, store_check, amqp_check],
            stats: stats.unwrap_or_default(),
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &ServiceContext) -> HealthStatus {
        if context.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - the service runs and its store answers
    pub async fn readiness_check(context: &ServiceContext) -> HealthStatus {
        if !context.is_running().await {
            return HealthStatus::Unhealthy;
        }

        Self::check_store(context).await.0.status
    }

    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck::new("service_running", status, message, start)
    }

    async fn check_store(context: &ServiceContext) -> (ComponentCheck, Option<SystemStats>) {
        let start = Instant::now();

        match context.queue_service.try_system_stats().await {
            Ok(stats) => (
                ComponentCheck::new("store", HealthStatus::Healthy, None, start),
                Some(stats),
            ),
            Err(e) => {
                error!("Store health check failed: {}", e);
                (
                    ComponentCheck::new(
                        "store",
                        HealthStatus::Unhealthy,
                        Some(format!("Store unreachable: {}", e)),
                        start,
                    ),
                    None,
                )
            }
        }
    }

    fn check_amqp(context: &ServiceContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &context.amqp_connection {
            None => (
                HealthStatus::Healthy,
                Some("AMQP disabled, events are logged".to_string()),
            ),
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
        };

        ComponentCheck::new("amqp_connection", status, message, start)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::events::EventBus;
    use crate::service::app::MatchingSystem;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn context(running: bool) -> ServiceContext {
        let (events, _receiver) = EventBus::channel();
        let system = MatchingSystem::build(
            &AppConfig::default(),
            Arc::new(InMemoryStore::new()),
            events,
            None,
        );
        ServiceContext {
            service_name: "counsel-match".to_string(),
            queue_service: system.queue_service.clone(),
            presence: system.presence.clone(),
            amqp_connection: None,
            is_running: Arc::new(RwLock::new(running)),
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_status_combination() {
        use HealthStatus::*;
        assert_eq!(Healthy.combine(Healthy), Healthy);
        assert_eq!(Healthy.combine(Degraded), Degraded);
        assert_eq!(Degraded.combine(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.as_metric(), 0);
        assert_eq!(Healthy.as_metric(), 2);
    }

    #[tokio::test]
    async fn test_running_service_is_healthy() {
        let context = context(true);
        context.queue_service.enqueue("cust-1").await.unwrap();

        let health = HealthCheck::check(&context).await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.total_waiting, 1);

        assert_eq!(
            HealthCheck::readiness_check(&context).await,
            HealthStatus::Healthy
        );
        assert!(health.to_json().unwrap().contains("\"healthy\""));
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let context = context(false);

        assert_eq!(
            HealthCheck::liveness_check(&context).await,
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(&context).await,
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::check(&context).await.status,
            HealthStatus::Unhealthy
        );
    }
}
