//! Customer and counselor facing HTTP routes
//!
//! Thin JSON layer over [`QueueService`](crate::queue::QueueService) and
//! [`CounselorPresence`](crate::matching::CounselorPresence).

use crate::error::MatchmakingError;
use crate::service::app::ServiceContext;
use crate::types::{CounselorId, CustomerId, HeartbeatStatus, QueueKind, QueueStatus, SystemStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub customer_id: CustomerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub customer_id: CustomerId,
    pub rank: u64,
    pub queue_kind: QueueKind,
    pub lease_ticket: String,
    pub estimated_wait_minutes: u64,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub queue_ticket: String,
}

#[derive(Debug, Deserialize)]
pub struct CounselorHeartbeatRequest {
    pub active: bool,
}

pub fn create_queue_router(context: ServiceContext) -> Router {
    Router::new()
        .route("/api/v1/queue", post(enqueue))
        .route("/api/v1/queue/heartbeat", post(heartbeat))
        .route(
            "/api/v1/queue/{customer_id}",
            get(queue_status).delete(cancel),
        )
        .route("/api/v1/stats", get(system_stats))
        .route(
            "/api/v1/counselors/{counselor_id}/heartbeat",
            post(counselor_heartbeat),
        )
        .with_state(context)
}

async fn enqueue(
    State(context): State<ServiceContext>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, (StatusCode, String)> {
    let receipt = context
        .queue_service
        .enqueue(&request.customer_id)
        .await
        .map_err(|e| match e.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::InvalidRequest { reason }) => {
                (StatusCode::BAD_REQUEST, reason.clone())
            }
            _ => {
                warn!("Enqueue of customer '{}' failed: {}", request.customer_id, e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Queue is temporarily unavailable".to_string(),
                )
            }
        })?;

    Ok(Json(EnqueueResponse {
        customer_id: receipt.customer_id,
        rank: receipt.rank,
        queue_kind: receipt.queue_kind,
        lease_ticket: receipt.lease_ticket,
        estimated_wait_minutes: receipt.estimated_wait_minutes,
    }))
}

async fn heartbeat(
    State(context): State<ServiceContext>,
    Json(request): Json<HeartbeatRequest>,
) -> Json<HeartbeatStatus> {
    Json(context.queue_service.heartbeat(&request.queue_ticket).await)
}

async fn cancel(
    State(context): State<ServiceContext>,
    Path(customer_id): Path<CustomerId>,
) -> StatusCode {
    if context.queue_service.cancel(&customer_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn queue_status(
    State(context): State<ServiceContext>,
    Path(customer_id): Path<CustomerId>,
) -> Result<Json<QueueStatus>, (StatusCode, String)> {
    context
        .queue_service
        .queue_status(&customer_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                MatchmakingError::CustomerNotFound { customer_id }.to_string(),
            )
        })
}

async fn system_stats(State(context): State<ServiceContext>) -> Json<SystemStats> {
    Json(context.queue_service.system_stats().await)
}

async fn counselor_heartbeat(
    State(context): State<ServiceContext>,
    Path(counselor_id): Path<CounselorId>,
    Json(request): Json<CounselorHeartbeatRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    context
        .presence
        .heartbeat(counselor_id, request.active)
        .await
        .map_err(|e| {
            warn!("Heartbeat of counselor {} failed: {}", counselor_id, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Counselor presence is temporarily unavailable".to_string(),
            )
        })?;

    Ok(StatusCode::NO_CONTENT)
}
