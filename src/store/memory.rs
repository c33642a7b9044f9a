//! In-memory [`Store`] implementation
//!
//! All state sits behind one mutex, so every trait method is atomic. TTL keys are
//! expired lazily when touched and in bulk by [`InMemoryStore::purge_expired`];
//! either way the expired key name is broadcast to expiration subscribers.

use super::{ScoredMember, Store};
use crate::error::{MatchmakingError, Result};
use crate::types::EnqueueScore;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

const EXPIRATION_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, EnqueueScore>,
    order: BTreeSet<(EnqueueScore, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: EnqueueScore) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(previous, member.to_string()));
        }
        self.order.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> Option<EnqueueScore> {
        let score = self.scores.remove(member)?;
        self.order.remove(&(score, member.to_string()));
        Some(score)
    }

    fn contains(&self, member: &str) -> bool {
        self.scores.contains_key(member)
    }

    fn rank(&self, member: &str) -> Option<usize> {
        let score = *self.scores.get(member)?;
        Some(self.order.range(..(score, member.to_string())).count())
    }

    fn pop_min(&mut self) -> Option<ScoredMember> {
        let (score, member) = self.order.pop_first()?;
        self.scores.remove(&member);
        Some(ScoredMember { member, score })
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
struct TtlValue {
    value: String,
    expires_at: Option<Instant>,
}

impl TtlValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Inner {
    sorted: HashMap<String, SortedSet>,
    values: HashMap<String, TtlValue>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    /// Drop `key` if its TTL has passed, recording it as expired
    fn expire_if_due(&mut self, key: &str, now: Instant, expired: &mut Vec<String>) {
        let due = self
            .values
            .get(key)
            .map(|v| v.is_expired(now))
            .unwrap_or(false);
        if due {
            self.values.remove(key);
            expired.push(key.to_string());
        }
    }

    fn live_value(&mut self, key: &str, now: Instant, expired: &mut Vec<String>) -> Option<&mut TtlValue> {
        self.expire_if_due(key, now, expired);
        self.values.get_mut(key)
    }

    fn sorted_mut(&mut self, key: &str) -> &mut SortedSet {
        self.sorted.entry(key.to_string()).or_default()
    }
}

/// In-memory store suitable for a single service instance and for tests
#[derive(Debug)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    expirations: broadcast::Sender<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (expirations, _) = broadcast::channel(EXPIRATION_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            expirations,
        }
    }

    /// Run `op` under the store lock, then broadcast anything that expired meanwhile
    fn with_inner<T>(&self, op: impl FnOnce(&mut Inner, Instant, &mut Vec<String>) -> T) -> Result<T> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let result = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| MatchmakingError::StoreUnavailable {
                    message: "Failed to acquire store lock".to_string(),
                })?;
            op(&mut inner, now, &mut expired)
        };

        for key in expired {
            debug!("Key expired: {}", key);
            // No subscribers is fine
            let _ = self.expirations.send(key);
        }

        Ok(result)
    }

    /// Remove every key whose TTL has passed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.with_inner(|inner, now, expired| {
            let due: Vec<String> = inner
                .values
                .iter()
                .filter(|(_, v)| v.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in due {
                inner.values.remove(&key);
                expired.push(key);
            }
            expired.len()
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn zadd_nx_exclusive(
        &self,
        key: &str,
        member: &str,
        score: EnqueueScore,
        exclusive_with: &[&str],
    ) -> Result<bool> {
        self.with_inner(|inner, _, _| {
            let present = std::iter::once(key)
                .chain(exclusive_with.iter().copied())
                .any(|k| inner.sorted.get(k).map(|s| s.contains(member)).unwrap_or(false));
            if present {
                return false;
            }
            inner.sorted_mut(key).insert(member, score);
            true
        })
    }

    async fn zrestore(
        &self,
        key: &str,
        entries: &[ScoredMember],
        exclusive_with: &[&str],
    ) -> Result<()> {
        self.with_inner(|inner, _, _| {
            for entry in entries {
                for other in exclusive_with {
                    if let Some(set) = inner.sorted.get_mut(*other) {
                        set.remove(&entry.member);
                    }
                }
                inner.sorted_mut(key).insert(&entry.member, entry.score);
            }
        })
    }

    async fn zmove(&self, source: &str, destination: &str, member: &str) -> Result<bool> {
        self.with_inner(|inner, _, _| {
            let score = match inner.sorted.get_mut(source).and_then(|s| s.remove(member)) {
                Some(score) => score,
                None => return false,
            };
            inner.sorted_mut(destination).insert(member, score);
            true
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.with_inner(|inner, _, _| {
            inner
                .sorted
                .get_mut(key)
                .and_then(|s| s.remove(member))
                .is_some()
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<EnqueueScore>> {
        self.with_inner(|inner, _, _| inner.sorted.get(key).and_then(|s| s.scores.get(member).copied()))
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>> {
        self.with_inner(|inner, _, _| inner.sorted.get(key).and_then(|s| s.rank(member)))
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.with_inner(|inner, _, _| inner.sorted.get(key).map(|s| s.len()).unwrap_or(0))
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMember>> {
        self.with_inner(|inner, _, _| {
            let set = match inner.sorted.get(key) {
                Some(set) => set,
                None => return Vec::new(),
            };
            set.order
                .iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(score, member)| ScoredMember::new(member.clone(), *score))
                .collect()
        })
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<ScoredMember>> {
        self.with_inner(|inner, _, _| inner.sorted.get_mut(key).and_then(|s| s.pop_min()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_inner(|inner, now, _| {
            inner.values.insert(
                key.to_string(),
                TtlValue {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                },
            );
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_inner(|inner, now, expired| {
            inner.live_value(key, now, expired).map(|v| v.value.clone())
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.with_inner(|inner, now, expired| {
            let had_value = inner.live_value(key, now, expired).is_some();
            let removed_value = had_value && inner.values.remove(key).is_some();
            let removed_sorted = inner.sorted.remove(key).map(|s| s.len() > 0).unwrap_or(false);
            let removed_set = inner.sets.remove(key).map(|s| !s.is_empty()).unwrap_or(false);
            removed_value || removed_sorted || removed_set
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.with_inner(|inner, now, expired| match inner.live_value(key, now, expired) {
            Some(value) => {
                value.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.with_inner(|inner, now, expired| {
            inner
                .live_value(key, now, expired)
                .and_then(|v| v.expires_at)
                .map(|at| at.saturating_duration_since(now))
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_inner(|inner, now, expired| inner.live_value(key, now, expired).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_inner(|inner, now, expired| {
            let candidates: Vec<String> = inner
                .values
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            candidates
                .into_iter()
                .filter(|k| inner.live_value(k, now, expired).is_some())
                .collect()
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.with_inner(|inner, _, _| {
            inner
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string())
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.with_inner(|inner, _, _| {
            inner
                .sets
                .get_mut(key)
                .map(|s| s.remove(member))
                .unwrap_or(false)
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with_inner(|inner, _, _| {
            inner
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with_inner(|inner, _, _| inner.sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        self.with_inner(|inner, _, _| inner.sets.get(key).map(|s| s.len()).unwrap_or(0))
    }

    fn subscribe_expirations(&self) -> broadcast::Receiver<String> {
        self.expirations.subscribe()
    }
}
