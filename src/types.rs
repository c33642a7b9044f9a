//! Common types used throughout the matching service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for waiting customers
pub type CustomerId = String;

/// Unique identifier for counselors
pub type CounselorId = u64;

/// Opaque liveness ticket handed to a waiting customer
pub type LeaseTicket = String;

/// Token identifying the consultation session created by a match
pub type SessionToken = String;

/// Ordering score of a waiting entry (microseconds since the Unix epoch)
pub type EnqueueScore = i64;

/// Average consultation length used for wait estimates
pub const MINUTES_PER_RANK: u64 = 5;

/// Which of the two waiting queues an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueKind {
    /// Customers already proven unmatchable against an earlier pool
    Priority,
    Normal,
}

impl QueueKind {
    /// Key of the ordered set backing this queue
    pub fn store_key(&self) -> &'static str {
        match self {
            QueueKind::Priority => "queue:priority",
            QueueKind::Normal => "queue:normal",
        }
    }

    /// Key of the other queue
    pub fn other(&self) -> QueueKind {
        match self {
            QueueKind::Priority => QueueKind::Normal,
            QueueKind::Normal => QueueKind::Priority,
        }
    }

    /// Lowercase label used in metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            QueueKind::Priority => "priority",
            QueueKind::Normal => "normal",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Priority => write!(f, "PRIORITY"),
            QueueKind::Normal => write!(f, "NORMAL"),
        }
    }
}

/// A customer waiting in one of the queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub customer_id: CustomerId,
    pub enqueue_score: EnqueueScore,
    pub queue_kind: QueueKind,
}

impl WaitingEntry {
    pub fn new(customer_id: impl Into<CustomerId>, enqueue_score: EnqueueScore, queue_kind: QueueKind) -> Self {
        Self {
            customer_id: customer_id.into(),
            enqueue_score,
            queue_kind,
        }
    }
}

/// Why a waiting entry was dropped without being matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionReason {
    /// Lease found dead during a scan
    Lease,
    /// Entry outlived the staleness bound
    Stale,
    /// Lease TTL expiry signalled by the store
    Expired,
}

impl EvictionReason {
    pub fn label(&self) -> &'static str {
        match self {
            EvictionReason::Lease => "lease",
            EvictionReason::Stale => "stale",
            EvictionReason::Expired => "expired",
        }
    }
}

/// Current sizes of both queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizes {
    pub normal: usize,
    pub priority: usize,
}

impl QueueSizes {
    pub fn total(&self) -> usize {
        self.normal + self.priority
    }
}

/// Position of a customer in the logical PRIORITY ++ NORMAL queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub customer_id: CustomerId,
    /// 1-indexed rank
    pub rank: u64,
    pub queue_kind: QueueKind,
    pub estimated_wait_minutes: u64,
}

impl QueueStatus {
    pub fn new(customer_id: impl Into<CustomerId>, rank: u64, queue_kind: QueueKind) -> Self {
        Self {
            customer_id: customer_id.into(),
            rank,
            queue_kind,
            estimated_wait_minutes: rank * MINUTES_PER_RANK,
        }
    }
}

/// Returned to a customer when they join (or re-join) the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub customer_id: CustomerId,
    pub rank: u64,
    pub queue_kind: QueueKind,
    pub lease_ticket: LeaseTicket,
    pub estimated_wait_minutes: u64,
    /// True when the customer was already waiting before this call
    pub already_queued: bool,
}

/// Outcome of a customer heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub alive: bool,
    pub remaining_ttl_seconds: i64,
}

impl HeartbeatStatus {
    pub fn renewed(remaining_ttl_seconds: i64) -> Self {
        Self {
            alive: true,
            remaining_ttl_seconds,
        }
    }

    pub fn expired() -> Self {
        Self {
            alive: false,
            remaining_ttl_seconds: 0,
        }
    }
}

/// Dashboard-level snapshot of the system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub normal_size: usize,
    pub priority_size: usize,
    pub total_waiting: usize,
    pub available_counselor_count: usize,
}

/// Event emitted to every customer whose rank moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankChanged {
    pub customer_id: CustomerId,
    pub rank: u64,
    pub timestamp: DateTime<Utc>,
}

/// Event broadcast whenever the queue sizes change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSizeChanged {
    pub normal_size: usize,
    pub priority_size: usize,
    pub total_waiting: usize,
    pub timestamp: DateTime<Utc>,
}

impl QueueSizeChanged {
    pub fn from_sizes(sizes: QueueSizes, timestamp: DateTime<Utc>) -> Self {
        Self {
            normal_size: sizes.normal,
            priority_size: sizes.priority,
            total_waiting: sizes.total(),
            timestamp,
        }
    }
}

/// Event emitted when a customer has been paired with a counselor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFormed {
    pub customer_id: CustomerId,
    pub counselor_id: CounselorId,
    pub session_token: SessionToken,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    RankChanged(RankChanged),
    QueueSizeChanged(QueueSizeChanged),
    MatchFormed(MatchFormed),
}

impl QueueEvent {
    /// Short event name used in logs and routing
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::RankChanged(_) => "RankChanged",
            QueueEvent::QueueSizeChanged(_) => "QueueSizeChanged",
            QueueEvent::MatchFormed(_) => "MatchFormed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_kind_keys_are_distinct() {
        assert_ne!(QueueKind::Priority.store_key(), QueueKind::Normal.store_key());
        assert_eq!(QueueKind::Priority.other(), QueueKind::Normal);
        assert_eq!(QueueKind::Normal.to_string(), "NORMAL");
    }

    #[test]
    fn test_status_estimates_wait_from_rank() {
        let status = QueueStatus::new("c1", 3, QueueKind::Normal);
        assert_eq!(status.estimated_wait_minutes, 15);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = QueueEvent::MatchFormed(MatchFormed {
            customer_id: "c1".to_string(),
            counselor_id: 7,
            session_token: "room-c1-7-abcdef12".to_string(),
            timestamp: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MatchFormed");
        assert_eq!(json["counselor_id"], 7);
    }
}
