//! Service layer for the counsel-match service
//!
//! Application state, background task management, health checks and the
//! HTTP routes of the running service.

pub mod api;
pub mod app;
pub mod health;

pub use api::create_queue_router;
pub use app::{AppState, MatchingSystem, ServiceContext, ServiceError};
pub use health::{HealthCheck, HealthStatus};
