//! Shared queue and lease state
//!
//! The [`Store`] port models an externally-atomic ordered key-value store with
//! sorted sets, TTL keys and plain sets. Every method is atomic on its own; the
//! multi-member operations (`zadd_nx_exclusive`, `zmove`, `zrestore`) exist so the
//! queue transitions the matching core needs can be applied in a single step.

pub mod memory;
#[cfg(test)]
pub(crate) mod faulty;

use crate::error::Result;
use crate::types::{CounselorId, EnqueueScore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

pub use memory::InMemoryStore;

/// Key layout shared by all components
pub mod keys {
    use super::CounselorId;

    pub const LEASE_PREFIX: &str = "lease:";
    pub const CUSTOMER_LEASE_PREFIX: &str = "customer-lease:";
    pub const COUNSELORS_AVAILABLE: &str = "counselors:available";
    pub const COUNSELOR_HEARTBEAT_PREFIX: &str = "counselor-heartbeat:";

    /// `lease:{ticket}` -> customer id
    pub fn lease(ticket: &str) -> String {
        format!("{}{}", LEASE_PREFIX, ticket)
    }

    /// `customer-lease:{customer}` -> ticket
    pub fn customer_lease(customer_id: &str) -> String {
        format!("{}{}", CUSTOMER_LEASE_PREFIX, customer_id)
    }

    /// `counselor-heartbeat:{id}` presence key
    pub fn counselor_heartbeat(counselor_id: CounselorId) -> String {
        format!("{}{}", COUNSELOR_HEARTBEAT_PREFIX, counselor_id)
    }
}

/// A member of a sorted set together with its score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: EnqueueScore,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: EnqueueScore) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Atomic ordered key-value store
#[async_trait]
pub trait Store: Send + Sync {
    // Sorted sets

    /// Insert `member` unless it is already present in `key` or any of `exclusive_with`.
    /// Returns true if inserted.
    async fn zadd_nx_exclusive(
        &self,
        key: &str,
        member: &str,
        score: EnqueueScore,
        exclusive_with: &[&str],
    ) -> Result<bool>;

    /// Insert every entry into `key` at its given score, first removing each member
    /// from `exclusive_with`. Applied as one step.
    async fn zrestore(
        &self,
        key: &str,
        entries: &[ScoredMember],
        exclusive_with: &[&str],
    ) -> Result<()>;

    /// Move `member` from `source` to `destination` keeping its score
    async fn zmove(&self, source: &str, destination: &str, member: &str) -> Result<bool>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<EnqueueScore>>;

    /// 0-indexed position of `member` in ascending score order
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Members in ascending score order starting at `offset`
    async fn zrange(&self, key: &str, offset: usize, limit: Option<usize>)
        -> Result<Vec<ScoredMember>>;

    /// Remove and return the lowest-score member
    async fn zpopmin(&self, key: &str) -> Result<Option<ScoredMember>>;

    // TTL keys

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key of any kind. Returns true if something was removed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Reset the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL, `None` if the key is absent or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    // Plain sets

    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn scard(&self, key: &str) -> Result<usize>;

    /// Subscribe to the names of keys removed by TTL expiry
    fn subscribe_expirations(&self) -> broadcast::Receiver<String>;
}
