//! Utility functions for the matching service

use crate::types::{CounselorId, EnqueueScore, LeaseTicket, SessionToken};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a new opaque lease ticket
pub fn generate_lease_ticket() -> LeaseTicket {
    Uuid::new_v4().to_string()
}

/// Generate the session token for a freshly formed match
///
/// Format: `room-{customer}-{counselor}-{8 hex chars}`.
pub fn generate_session_token(customer_id: &str, counselor_id: CounselorId) -> SessionToken {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("room-{}-{}-{}", customer_id, counselor_id, &suffix[..8])
}

/// Age of an entry in whole seconds, given its enqueue score
pub fn entry_age_seconds(enqueue_score: EnqueueScore, now: DateTime<Utc>) -> i64 {
    (now.timestamp_micros() - enqueue_score) / 1_000_000
}

/// Monotonic source of enqueue scores
///
/// Scores are wall-clock microseconds; two calls within the same microsecond
/// are separated by bumping the later one, so scores are strictly increasing.
#[derive(Debug, Default)]
pub struct ScoreClock {
    last: AtomicI64,
}

impl ScoreClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next strictly increasing score
    pub fn next(&self) -> EnqueueScore {
        let now = current_timestamp().timestamp_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}
