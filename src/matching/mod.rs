//! The matching core: counselor availability, the single-flight queue scan,
//! counselor scoring and the periodic scheduler tying them together

pub mod availability;
pub mod collaborators;
pub mod maker;
pub mod scheduler;
pub mod scorer;

pub use availability::{CounselorAvailabilityRegistry, CounselorPresence, StoreHeartbeatLiveness};
pub use collaborators::{
    BlacklistLookup, ConsultationHistory, CounselorHeartbeatLiveness, HistoryAggregates,
    InMemoryBlacklist, InMemoryHeartbeatLiveness, InMemoryHistoryAggregates,
};
pub use maker::{MatchMaker, MatchResult};
pub use scheduler::{MatchScheduler, TickReport};
pub use scorer::{CounselorScorer, ScoreInputs, ScoringWeights};
