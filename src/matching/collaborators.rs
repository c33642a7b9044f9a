//! Read contracts the matching core needs from the rest of the platform
//!
//! How blacklists, counselor presence and consultation history are stored is not
//! this crate's business; the core only reads through these traits. The in-memory
//! adapters back the standalone service and the tests.

use crate::error::{MatchmakingError, Result};
use crate::types::{CounselorId, CustomerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

/// Counselors a customer has blocked (one-directional)
#[async_trait]
pub trait BlacklistLookup: Send + Sync {
    async fn blocked_counselors(&self, customer_id: &str) -> Result<HashSet<CounselorId>>;
}

/// Externally maintained counselor presence
#[async_trait]
pub trait CounselorHeartbeatLiveness: Send + Sync {
    async fn is_alive(&self, counselor_id: CounselorId) -> Result<bool>;

    /// Every counselor with a live heartbeat
    async fn live_counselors(&self) -> Result<BTreeSet<CounselorId>>;
}

/// Past consultations between one counselor and one customer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsultationHistory {
    pub count: u64,
    /// `None` when none of the consultations were rated
    pub avg_rating: Option<f64>,
}

/// Read-only consultation statistics used for scoring
#[async_trait]
pub trait HistoryAggregates: Send + Sync {
    async fn consultation_history(
        &self,
        counselor_id: CounselorId,
        customer_id: &str,
    ) -> Result<ConsultationHistory>;

    /// Past consultations of a counselor in a product category
    async fn category_count(&self, counselor_id: CounselorId, category: &str) -> Result<u64>;

    /// Category of the customer's most recent registration
    async fn latest_category(&self, customer_id: &str) -> Result<Option<String>>;
}

fn lock_error(what: &str) -> MatchmakingError {
    MatchmakingError::InternalError {
        message: format!("Failed to acquire {} lock", what),
    }
}

/// In-memory blacklist
#[derive(Debug, Default)]
pub struct InMemoryBlacklist {
    blocked: RwLock<HashMap<CustomerId, HashSet<CounselorId>>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, customer_id: &str, counselor_id: CounselorId) -> Result<()> {
        let mut blocked = self.blocked.write().map_err(|_| lock_error("blacklist"))?;
        blocked
            .entry(customer_id.to_string())
            .or_default()
            .insert(counselor_id);
        Ok(())
    }

    pub fn unblock(&self, customer_id: &str, counselor_id: CounselorId) -> Result<bool> {
        let mut blocked = self.blocked.write().map_err(|_| lock_error("blacklist"))?;
        Ok(blocked
            .get_mut(customer_id)
            .map(|set| set.remove(&counselor_id))
            .unwrap_or(false))
    }
}

#[async_trait]
impl BlacklistLookup for InMemoryBlacklist {
    async fn blocked_counselors(&self, customer_id: &str) -> Result<HashSet<CounselorId>> {
        let blocked = self.blocked.read().map_err(|_| lock_error("blacklist"))?;
        Ok(blocked.get(customer_id).cloned().unwrap_or_default())
    }
}

/// In-memory counselor presence, for wiring without a store-backed heartbeat
#[derive(Debug, Default)]
pub struct InMemoryHeartbeatLiveness {
    live: RwLock<BTreeSet<CounselorId>>,
}

impl InMemoryHeartbeatLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alive(&self, counselor_id: CounselorId, alive: bool) -> Result<()> {
        let mut live = self.live.write().map_err(|_| lock_error("liveness"))?;
        if alive {
            live.insert(counselor_id);
        } else {
            live.remove(&counselor_id);
        }
        Ok(())
    }
}

#[async_trait]
impl CounselorHeartbeatLiveness for InMemoryHeartbeatLiveness {
    async fn is_alive(&self, counselor_id: CounselorId) -> Result<bool> {
        let live = self.live.read().map_err(|_| lock_error("liveness"))?;
        Ok(live.contains(&counselor_id))
    }

    async fn live_counselors(&self) -> Result<BTreeSet<CounselorId>> {
        let live = self.live.read().map_err(|_| lock_error("liveness"))?;
        Ok(live.clone())
    }
}

#[derive(Debug, Default)]
struct RatingTally {
    count: u64,
    rated: u64,
    rating_sum: f64,
}

#[derive(Debug, Default)]
struct HistoryTables {
    pairs: HashMap<(CounselorId, CustomerId), RatingTally>,
    categories: HashMap<(CounselorId, String), u64>,
    latest_category: HashMap<CustomerId, String>,
}

/// In-memory consultation history
#[derive(Debug, Default)]
pub struct InMemoryHistoryAggregates {
    tables: RwLock<HistoryTables>,
}

impl InMemoryHistoryAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished consultation
    pub fn record_consultation(
        &self,
        counselor_id: CounselorId,
        customer_id: &str,
        rating: Option<f64>,
        category: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| lock_error("history"))?;

        let tally = tables
            .pairs
            .entry((counselor_id, customer_id.to_string()))
            .or_default();
        tally.count += 1;
        if let Some(rating) = rating {
            tally.rated += 1;
            tally.rating_sum += rating;
        }

        if let Some(category) = category {
            *tables
                .categories
                .entry((counselor_id, category.to_string()))
                .or_default() += 1;
        }
        Ok(())
    }

    /// Set the category of the customer's latest registration
    pub fn set_latest_category(&self, customer_id: &str, category: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| lock_error("history"))?;
        tables
            .latest_category
            .insert(customer_id.to_string(), category.to_string());
        Ok(())
    }
}

#[async_trait]
impl HistoryAggregates for InMemoryHistoryAggregates {
    async fn consultation_history(
        &self,
        counselor_id: CounselorId,
        customer_id: &str,
    ) -> Result<ConsultationHistory> {
        let tables = self.tables.read().map_err(|_| lock_error("history"))?;
        Ok(tables
            .pairs
            .get(&(counselor_id, customer_id.to_string()))
            .map(|tally| ConsultationHistory {
                count: tally.count,
                avg_rating: (tally.rated > 0).then(|| tally.rating_sum / tally.rated as f64),
            })
            .unwrap_or_default())
    }

    async fn category_count(&self, counselor_id: CounselorId, category: &str) -> Result<u64> {
        let tables = self.tables.read().map_err(|_| lock_error("history"))?;
        Ok(tables
            .categories
            .get(&(counselor_id, category.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn latest_category(&self, customer_id: &str) -> Result<Option<String>> {
        let tables = self.tables.read().map_err(|_| lock_error("history"))?;
        Ok(tables.latest_category.get(customer_id).cloned())
    }
}
