//! [`InMemoryStore`] wrapper that fails selected operations on demand

use super::{InMemoryStore, ScoredMember, Store};
use crate::error::{MatchmakingError, Result};
use crate::types::EnqueueScore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    zrestore_failures: AtomicUsize,
    srem_failures: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `zrestore`
    pub fn fail_zrestore(&self, count: usize) {
        self.zrestore_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `srem`
    pub fn fail_srem(&self, count: usize) {
        self.srem_failures.store(count, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, op: &str) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(MatchmakingError::StoreUnavailable {
                message: format!("injected {} failure", op),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn zadd_nx_exclusive(
        &self,
        key: &str,
        member: &str,
        score: EnqueueScore,
        exclusive_with: &[&str],
    ) -> Result<bool> {
        self.inner
            .zadd_nx_exclusive(key, member, score, exclusive_with)
            .await
    }

    async fn zrestore(
        &self,
        key: &str,
        entries: &[ScoredMember],
        exclusive_with: &[&str],
    ) -> Result<()> {
        Self::trip(&self.zrestore_failures, "zrestore")?;
        self.inner.zrestore(key, entries, exclusive_with).await
    }

    async fn zmove(&self, source: &str, destination: &str, member: &str) -> Result<bool> {
        self.inner.zmove(source, destination, member).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.inner.zrem(key, member).await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<EnqueueScore>> {
        self.inner.zscore(key, member).await
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>> {
        self.inner.zrank(key, member).await
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.inner.zcard(key).await
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMember>> {
        self.inner.zrange(key, offset, limit).await
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<ScoredMember>> {
        self.inner.zpopmin(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.inner.del(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        Self::trip(&self.srem_failures, "srem")?;
        self.inner.srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.inner.sismember(key, member).await
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        self.inner.scard(key).await
    }

    fn subscribe_expirations(&self) -> broadcast::Receiver<String> {
        self.inner.subscribe_expirations()
    }
}
