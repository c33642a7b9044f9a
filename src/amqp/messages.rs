//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::QueueEvent;
use serde_json;

/// Routing keys for events
pub const RANK_CHANGED_ROUTING_KEY: &str = "queue.rank_changed";
pub const QUEUE_SIZE_CHANGED_ROUTING_KEY: &str = "queue.size_changed";
pub const MATCH_FORMED_ROUTING_KEY: &str = "match.formed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Routing key for an outbound event
pub fn routing_key(event: &QueueEvent) -> &'static str {
    match event {
        QueueEvent::RankChanged(_) => RANK_CHANGED_ROUTING_KEY,
        QueueEvent::QueueSizeChanged(_) => QUEUE_SIZE_CHANGED_ROUTING_KEY,
        QueueEvent::MatchFormed(_) => MATCH_FORMED_ROUTING_KEY,
    }
}
