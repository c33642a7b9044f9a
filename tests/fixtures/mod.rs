//! Shared fixtures: a complete in-memory matching system with its event stream
#![allow(dead_code)]

use counsel_match::config::AppConfig;
use counsel_match::events::EventBus;
use counsel_match::service::MatchingSystem;
use counsel_match::store::InMemoryStore;
use counsel_match::types::{
    CounselorId, CustomerId, EnqueueReceipt, QueueEvent, QueueKind, WaitingEntry,
};
use counsel_match::utils::current_timestamp;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Defaults with a fast tick
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.matching.tick_interval_ms = 20;
    config
}

pub struct TestSystem {
    pub system: MatchingSystem,
    pub events: mpsc::UnboundedReceiver<QueueEvent>,
}

pub fn build_system() -> TestSystem {
    build_system_with(test_config())
}

pub fn build_system_with(config: AppConfig) -> TestSystem {
    let (bus, events) = EventBus::channel();
    let system = MatchingSystem::build(&config, Arc::new(InMemoryStore::new()), bus, None);
    TestSystem { system, events }
}

impl TestSystem {
    /// Enqueue through the customer-facing surface
    pub async fn join(&self, customer_id: &str) -> EnqueueReceipt {
        self.system
            .queue_service
            .enqueue(customer_id)
            .await
            .expect("enqueue should succeed")
    }

    /// Enqueue with a score `age_seconds` in the past and a live lease
    pub async fn join_aged(&self, customer_id: &str, kind: QueueKind, age_seconds: i64) {
        self.system
            .leases
            .create(customer_id)
            .await
            .expect("lease should be created");
        let score = current_timestamp().timestamp_micros() - age_seconds * 1_000_000;
        self.system
            .queue
            .restore(kind, &[WaitingEntry::new(customer_id, score, kind)])
            .await
            .expect("restore should succeed");
    }

    pub async fn counselor_online(&self, counselor_id: CounselorId) {
        self.system
            .presence
            .heartbeat(counselor_id, true)
            .await
            .expect("counselor heartbeat should succeed");
    }

    /// Customers in rank order
    pub async fn waiting(&self) -> Vec<CustomerId> {
        self.system
            .queue
            .customers_from_rank(1)
            .await
            .expect("queue should be readable")
            .into_iter()
            .map(|(customer_id, _)| customer_id)
            .collect()
    }

    /// Queue of a waiting customer
    pub async fn kind_of(&self, customer_id: &str) -> Option<QueueKind> {
        self.system
            .queue_service
            .queue_status(customer_id)
            .await
            .map(|status| status.queue_kind)
    }

    /// Everything emitted so far
    pub fn drain_events(&mut self) -> Vec<QueueEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
