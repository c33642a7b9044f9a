//! Counselor availability
//!
//! A counselor is offered for matching when they are in the available set AND
//! their presence heartbeat is alive. The set lives in the store; presence is a
//! TTL key per counselor, refreshed by the counselor's client.

use crate::error::Result;
use crate::matching::CounselorHeartbeatLiveness;
use crate::store::{keys, Store};
use crate::types::CounselorId;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Set of counselors currently offered for matching
pub struct CounselorAvailabilityRegistry {
    store: Arc<dyn Store>,
    liveness: Arc<dyn CounselorHeartbeatLiveness>,
}

impl CounselorAvailabilityRegistry {
    pub fn new(store: Arc<dyn Store>, liveness: Arc<dyn CounselorHeartbeatLiveness>) -> Self {
        Self { store, liveness }
    }

    pub async fn set_available(&self, counselor_id: CounselorId) -> Result<bool> {
        self.store
            .sadd(keys::COUNSELORS_AVAILABLE, &counselor_id.to_string())
            .await
    }

    pub async fn set_unavailable(&self, counselor_id: CounselorId) -> Result<bool> {
        self.store
            .srem(keys::COUNSELORS_AVAILABLE, &counselor_id.to_string())
            .await
    }

    /// Members of the available set, ignoring liveness
    pub async fn available_ids(&self) -> Result<BTreeSet<CounselorId>> {
        let members = self.store.smembers(keys::COUNSELORS_AVAILABLE).await?;
        Ok(members
            .iter()
            .filter_map(|m| match m.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring malformed counselor id '{}' in available set", m);
                    None
                }
            })
            .collect())
    }

    pub async fn is_available(&self, counselor_id: CounselorId) -> Result<bool> {
        self.store
            .sismember(keys::COUNSELORS_AVAILABLE, &counselor_id.to_string())
            .await
    }

    pub async fn available_count(&self) -> Result<usize> {
        self.store.scard(keys::COUNSELORS_AVAILABLE).await
    }

    /// Empty the available set
    pub async fn clear_all(&self) -> Result<()> {
        self.store.del(keys::COUNSELORS_AVAILABLE).await?;
        info!("Cleared all counselor availability");
        Ok(())
    }

    /// Available counselors whose heartbeat is alive; this is the matching pool
    pub async fn matchable_ids(&self) -> Result<BTreeSet<CounselorId>> {
        let available = self.available_ids().await?;
        if available.is_empty() {
            return Ok(available);
        }
        let live = self.liveness.live_counselors().await?;

        let (matchable, silent): (BTreeSet<_>, BTreeSet<_>) =
            available.into_iter().partition(|id| live.contains(id));
        if !silent.is_empty() {
            warn!(
                "Counselors {:?} are available but have no live heartbeat",
                silent
            );
        }
        Ok(matchable)
    }
}

/// Counselor presence kept as TTL keys in the store
pub struct StoreHeartbeatLiveness {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl StoreHeartbeatLiveness {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Refresh a counselor's presence for one TTL
    pub async fn beat(&self, counselor_id: CounselorId) -> Result<()> {
        self.store
            .set_ex(&keys::counselor_heartbeat(counselor_id), "1", self.ttl)
            .await
    }

    pub async fn clear(&self, counselor_id: CounselorId) -> Result<bool> {
        self.store
            .del(&keys::counselor_heartbeat(counselor_id))
            .await
    }
}

#[async_trait]
impl CounselorHeartbeatLiveness for StoreHeartbeatLiveness {
    async fn is_alive(&self, counselor_id: CounselorId) -> Result<bool> {
        self.store
            .exists(&keys::counselor_heartbeat(counselor_id))
            .await
    }

    async fn live_counselors(&self) -> Result<BTreeSet<CounselorId>> {
        let live = self
            .store
            .keys_with_prefix(keys::COUNSELOR_HEARTBEAT_PREFIX)
            .await?;
        Ok(live
            .iter()
            .filter_map(|k| k.strip_prefix(keys::COUNSELOR_HEARTBEAT_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect())
    }
}

/// Counselor check-in / check-out
pub struct CounselorPresence {
    registry: Arc<CounselorAvailabilityRegistry>,
    heartbeats: Arc<StoreHeartbeatLiveness>,
}

impl CounselorPresence {
    pub fn new(
        registry: Arc<CounselorAvailabilityRegistry>,
        heartbeats: Arc<StoreHeartbeatLiveness>,
    ) -> Self {
        Self {
            registry,
            heartbeats,
        }
    }

    /// An active heartbeat refreshes presence and offers the counselor for
    /// matching; an inactive one withdraws both
    pub async fn heartbeat(&self, counselor_id: CounselorId, active: bool) -> Result<()> {
        if active {
            self.heartbeats.beat(counselor_id).await?;
            if self.registry.set_available(counselor_id).await? {
                info!("Counselor {} is now available", counselor_id);
            }
        } else {
            self.heartbeats.clear(counselor_id).await?;
            if self.registry.set_unavailable(counselor_id).await? {
                info!("Counselor {} went offline", counselor_id);
            }
        }
        Ok(())
    }
}
