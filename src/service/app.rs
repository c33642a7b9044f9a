//! Main application state and service coordination
//!
//! This module wires the store, queue, matching core and event sink together
//! and owns the background tasks of the running service.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{AmqpEventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::events::{spawn_dispatcher, EventBus, EventPublisher, LoggingEventPublisher};
use crate::matching::{
    CounselorAvailabilityRegistry, CounselorPresence, CounselorScorer, InMemoryBlacklist,
    InMemoryHistoryAggregates, MatchMaker, MatchScheduler, ScoringWeights, StoreHeartbeatLiveness,
};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::queue::{
    ExpirationListener, LeaseRegistry, QueueNotifier, QueueService, WaitingQueueStore,
};
use crate::service::health::HealthCheck;
use crate::store::{InMemoryStore, Store};
use crate::types::QueueEvent;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Every component of the matching core, wired over one store
pub struct MatchingSystem {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<WaitingQueueStore>,
    pub leases: Arc<LeaseRegistry>,
    pub heartbeats: Arc<StoreHeartbeatLiveness>,
    pub availability: Arc<CounselorAvailabilityRegistry>,
    pub presence: Arc<CounselorPresence>,
    pub blacklist: Arc<InMemoryBlacklist>,
    pub history: Arc<InMemoryHistoryAggregates>,
    pub queue_service: Arc<QueueService>,
    pub maker: Arc<MatchMaker>,
    pub scheduler: Arc<MatchScheduler>,
    pub events: EventBus,
}

impl MatchingSystem {
    pub fn build(
        config: &AppConfig,
        store: Arc<InMemoryStore>,
        events: EventBus,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let shared: Arc<dyn Store> = store.clone();

        let queue = Arc::new(WaitingQueueStore::new(shared.clone()));
        let leases = Arc::new(LeaseRegistry::new(shared.clone(), config.lease_ttl()));
        let heartbeats = Arc::new(StoreHeartbeatLiveness::new(
            shared.clone(),
            config.counselor_heartbeat_ttl(),
        ));
        let availability = Arc::new(CounselorAvailabilityRegistry::new(
            shared,
            heartbeats.clone(),
        ));
        let presence = Arc::new(CounselorPresence::new(
            availability.clone(),
            heartbeats.clone(),
        ));
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let history = Arc::new(InMemoryHistoryAggregates::new());

        let mut notifier = QueueNotifier::new(queue.clone(), events.clone());
        if let Some(metrics) = &metrics {
            notifier = notifier.with_metrics(metrics.clone());
        }

        let queue_service = Arc::new(QueueService::new(
            queue.clone(),
            leases.clone(),
            availability.clone(),
            notifier.clone(),
        ));

        let maker = Arc::new(MatchMaker::new(
            queue.clone(),
            leases.clone(),
            blacklist.clone(),
            notifier,
            config.stale_entry_after(),
        ));

        let mut scheduler = MatchScheduler::new(
            availability.clone(),
            queue.clone(),
            leases.clone(),
            maker.clone(),
            CounselorScorer::new(ScoringWeights::from(&config.scoring)),
            history.clone(),
            events.clone(),
            config.tick_interval(),
        );
        if let Some(metrics) = metrics {
            scheduler = scheduler.with_metrics(metrics);
        }

        Self {
            store,
            queue,
            leases,
            heartbeats,
            availability,
            presence,
            blacklist,
            history,
            queue_service,
            maker,
            scheduler: Arc::new(scheduler),
            events,
        }
    }

    /// Listener turning store expirations into evictions and counselor check-outs
    pub fn expiration_listener(&self) -> ExpirationListener {
        ExpirationListener::new(self.queue_service.clone(), self.availability.clone())
    }
}

/// What the HTTP handlers and health checks need from the running service
#[derive(Clone)]
pub struct ServiceContext {
    pub service_name: String,
    pub queue_service: Arc<QueueService>,
    pub presence: Arc<CounselorPresence>,
    pub amqp_connection: Option<Arc<AmqpConnection>>,
    pub is_running: Arc<RwLock<bool>>,
    pub started_at: Instant,
}

impl ServiceContext {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Matching core
    system: MatchingSystem,

    /// Handles shared with the HTTP layer
    context: ServiceContext,

    /// Where dispatched events end up
    event_sink: Arc<dyn EventPublisher>,

    /// Taken by the dispatcher on start
    event_receiver: Option<mpsc::UnboundedReceiver<QueueEvent>>,

    /// Dispatcher task, stopped last so it can drain
    dispatcher: Option<JoinHandle<()>>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} matching service", config.service.name);
        info!(
            "Configuration: tick={}ms, lease_ttl={}s, stale_after={}s, amqp_enabled={}",
            config.matching.tick_interval_ms,
            config.matching.lease_ttl_seconds,
            config.matching.stale_entry_seconds,
            config.amqp.enabled
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (amqp_connection, event_sink) = Self::initialize_event_sink(&config).await?;

        let (events, event_receiver) = EventBus::channel();
        let system = MatchingSystem::build(
            &config,
            Arc::new(InMemoryStore::new()),
            events,
            Some(metrics_collector.clone()),
        );

        let is_running = Arc::new(RwLock::new(false));
        let context = ServiceContext {
            service_name: config.service.name.clone(),
            queue_service: system.queue_service.clone(),
            presence: system.presence.clone(),
            amqp_connection,
            is_running: is_running.clone(),
            started_at: Instant::now(),
        };

        let metrics_service =
            Self::initialize_metrics(&config, metrics_collector, context.clone());

        Ok(Self {
            config,
            system,
            context,
            event_sink,
            event_receiver: Some(event_receiver),
            dispatcher: None,
            metrics_service,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the dispatcher, the HTTP server and all background loops
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} matching service", self.config.service.name);

        *self.is_running.write().await = true;

        let receiver = self
            .event_receiver
            .take()
            .ok_or_else(|| ServiceError::Initialization {
                message: "Service was already started".to_string(),
            })?;
        self.dispatcher = Some(spawn_dispatcher(
            receiver,
            self.event_sink.clone(),
            Some(self.metrics_service.collector()),
        ));

        self.start_metrics_service().await?;
        self.start_background_tasks();

        info!("✅ {} started successfully", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        // Producers first, then the dispatcher once it had a chance to drain
        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
            debug!("Event dispatcher stopped");
        }

        if let Some(connection) = &self.context.amqp_connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        let final_stats = self
            .system
            .queue_service
            .try_system_stats()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Matching core components
    pub fn system(&self) -> &MatchingSystem {
        &self.system
    }

    /// Handles shared with the HTTP layer and health checks
    pub fn context(&self) -> ServiceContext {
        self.context.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// AMQP sink when enabled, logging sink otherwise
    async fn initialize_event_sink(
        config: &AppConfig,
    ) -> Result<(Option<Arc<AmqpConnection>>, Arc<dyn EventPublisher>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled, events will be written to the log");
            return Ok((None, Arc::new(LoggingEventPublisher::new())));
        }

        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok((Some(Arc::new(connection)), Arc::new(publisher)))
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        context: ServiceContext,
    ) -> Arc<MetricsService> {
        let health_config = HealthServerConfig {
            port: config.service.http_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_context(context),
        );
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Serve health, metrics and the queue API
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.http_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                tracing::error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ HTTP server started on port {}", port);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        info!("Starting background tasks...");

        let scheduler_task = self.system.scheduler.clone().start(self.is_running.clone());

        // Subscribed before the sweeper runs so no expiry is missed
        let expirations = self.system.store.subscribe_expirations();
        let listener_task = self.system.expiration_listener().spawn(expirations);

        let sweeper_task = {
            let store = self.system.store.clone();
            let sweep_interval = self.config.expiry_sweep_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);
                info!(
                    "Expiry sweeper started ({}ms interval)",
                    sweep_interval.as_millis()
                );

                while *is_running.read().await {
                    interval.tick().await;

                    match store.purge_expired() {
                        Ok(0) => {}
                        Ok(purged) => debug!("Expired {} keys", purged),
                        Err(e) => warn!("Expiry sweep failed: {}", e),
                    }
                }

                info!("Expiry sweeper stopped");
            })
        };

        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let context = self.context.clone();
            let update_interval = self.config.metrics_update_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(update_interval);
                info!(
                    "Health metrics task started ({}s interval)",
                    update_interval.as_secs()
                );

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = context.uptime().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let health = HealthCheck::check(&context).await;
                    metrics_collector.update_health_status(health.status.as_metric());
                    for check in &health.checks {
                        metrics_collector.update_component_health(
                            &check.name,
                            check.status != crate::service::health::HealthStatus::Unhealthy,
                        );
                    }

                    debug!(
                        "Updated service health metrics - uptime: {}s, status: {:?}",
                        uptime_seconds, health.status
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(scheduler_task);
        self.background_tasks.push(listener_task);
        self.background_tasks.push(sweeper_task);
        self.background_tasks.push(health_metrics_task);

        info!(
            "{} background tasks started successfully",
            self.background_tasks.len()
        );
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.service.http_port = 0;
        config.matching.tick_interval_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_new_app_state_is_idle() {
        let app = AppState::new(test_config()).await.unwrap();

        assert!(!app.is_running().await);
        assert!(app.context().amqp_connection.is_none());

        let receipt = app
            .context()
            .queue_service
            .enqueue("cust-1")
            .await
            .unwrap();
        assert_eq!(receipt.rank, 1);
    }

    #[tokio::test]
    async fn test_running_service_matches_waiting_customer() {
        let mut app = AppState::new(test_config()).await.unwrap();
        app.start().await.unwrap();
        assert!(app.is_running().await);

        let context = app.context();
        context.queue_service.enqueue("cust-1").await.unwrap();
        context.presence.heartbeat(7, true).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(context.queue_service.queue_status("cust-1").await.is_none());
        let stats = context.queue_service.system_stats().await;
        assert_eq!(stats.total_waiting, 0);
        assert_eq!(stats.available_counselor_count, 0);

        app.shutdown().await.unwrap();
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut app = AppState::new(test_config()).await.unwrap();
        app.start().await.unwrap();
        assert!(app.start().await.is_err());
        app.shutdown().await.unwrap();
    }
}
