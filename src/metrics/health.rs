//! Health check endpoints and Prometheus metrics server
//!
//! One axum server carries the probes, the text exposition of the metrics
//! registry and, once the service is wired, the queue API routes.

use crate::metrics::collector::MetricsCollector;
use crate::service::api::create_queue_router;
use crate::service::app::ServiceContext;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "counsel-match";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<ServiceContext>,
}

/// HTTP server for monitoring and the queue API
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the running service so probes report on it and the API is served
    pub fn with_context(mut self, context: ServiceContext) -> Self {
        self.state.context = Some(context);
        self
    }

    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("HTTP server listening on http://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let monitoring = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone());

        match &self.state.context {
            Some(context) => monitoring.merge(create_queue_router(context.clone())),
            None => monitoring,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping HTTP server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to HTTP server: {}", e);
        }

        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/api/v1/queue",
            "/api/v1/stats"
        ]
    }))
}

fn status_body(status: &str) -> serde_json::Value {
    json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    match &state.context {
        Some(context) => match HealthCheck::liveness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, Json(status_body("healthy"))),
            HealthStatus::Degraded => (StatusCode::OK, Json(status_body("degraded"))),
            HealthStatus::Unhealthy => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(status_body("unhealthy")),
            ),
        },
        None => {
            let mut body = status_body("unhealthy");
            body["error"] = json!("Service not initialized");
            (StatusCode::SERVICE_UNAVAILABLE, Json(body))
        }
    }
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.context {
        Some(context) => match HealthCheck::readiness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, "Ready"),
            HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready"),
            HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.context {
        Some(context) => match HealthCheck::liveness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            output,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                "Failed to encode metrics".to_string(),
            )
        }
    }
}

/// Detailed report for humans
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    match &state.context {
        Some(context) => {
            let health = HealthCheck::check(context).await;
            let stats = json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime_seconds": health.uptime_seconds
                },
                "queue": {
                    "normal": health.stats.normal_size,
                    "priority": health.stats.priority_size,
                    "total_waiting": health.stats.total_waiting
                },
                "counselors": {
                    "available": health.stats.available_counselor_count
                },
                "components": health.checks,
                "timestamp": health.timestamp
            });

            (StatusCode::OK, Json(stats))
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "error"
                },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        ),
    }
}
