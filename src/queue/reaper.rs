//! Expiration listener
//!
//! Turns TTL-expiry signals from the store into their consequences: an expired
//! customer lease evicts the customer's queue entry, and an expired counselor
//! heartbeat takes the counselor out of the available set.

use crate::matching::CounselorAvailabilityRegistry;
use crate::queue::QueueService;
use crate::store::keys;
use crate::types::CounselorId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// What an expired key means for the matching core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiredKey {
    CustomerLease(String),
    CounselorHeartbeat(CounselorId),
    Other,
}

impl ExpiredKey {
    pub fn parse(key: &str) -> Self {
        if let Some(customer_id) = key.strip_prefix(keys::CUSTOMER_LEASE_PREFIX) {
            return ExpiredKey::CustomerLease(customer_id.to_string());
        }
        if let Some(id) = key.strip_prefix(keys::COUNSELOR_HEARTBEAT_PREFIX) {
            if let Ok(counselor_id) = id.parse() {
                return ExpiredKey::CounselorHeartbeat(counselor_id);
            }
        }
        ExpiredKey::Other
    }
}

pub struct ExpirationListener {
    queue_service: Arc<QueueService>,
    availability: Arc<CounselorAvailabilityRegistry>,
}

impl ExpirationListener {
    pub fn new(
        queue_service: Arc<QueueService>,
        availability: Arc<CounselorAvailabilityRegistry>,
    ) -> Self {
        Self {
            queue_service,
            availability,
        }
    }

    /// Apply the consequence of one expired key
    pub async fn handle_expired_key(&self, key: &str) {
        match ExpiredKey::parse(key) {
            ExpiredKey::CustomerLease(customer_id) => {
                self.queue_service.evict_if_expired(&customer_id).await;
            }
            ExpiredKey::CounselorHeartbeat(counselor_id) => {
                match self.availability.set_unavailable(counselor_id).await {
                    Ok(true) => info!(
                        "Counselor {} heartbeat expired, marked unavailable",
                        counselor_id
                    ),
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Failed to mark counselor {} unavailable after heartbeat expiry: {}",
                        counselor_id, e
                    ),
                }
            }
            ExpiredKey::Other => debug!("Ignoring expired key {}", key),
        }
    }

    /// Consume expiry signals until the store's channel closes
    pub fn spawn(self, receiver: broadcast::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Expiration listener started");
            let mut expirations = BroadcastStream::new(receiver);

            while let Some(item) = expirations.next().await {
                match item {
                    Ok(key) => self.handle_expired_key(&key).await,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        // Missed customers are caught by the scan's liveness check
                        warn!("Expiration listener lagged, {} signals dropped", missed);
                    }
                }
            }

            info!("Expiration listener stopped");
        })
    }
}
