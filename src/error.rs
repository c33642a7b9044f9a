//! Error types for the matching service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Absent customers and leases are modelled as `None`,
//! never as errors.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matching scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Backing store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Customer not found: {customer_id}")]
    CustomerNotFound { customer_id: String },

    #[error("External collaborator failed: {message}")]
    CollaboratorFailed { message: String },

    #[error("Queue rollback failed, {entries} entries could not be restored: {message}")]
    RollbackFailed { entries: usize, message: String },

    #[error("Event publish failed: {message}")]
    EventPublishFailed { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether the failure is expected to clear up on a later retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MatchmakingError::StoreUnavailable { .. }
                | MatchmakingError::CollaboratorFailed { .. }
                | MatchmakingError::EventPublishFailed { .. }
                | MatchmakingError::AmqpConnectionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let store = MatchmakingError::StoreUnavailable {
            message: "timeout".to_string(),
        };
        let rollback = MatchmakingError::RollbackFailed {
            entries: 2,
            message: "lock poisoned".to_string(),
        };

        assert!(store.is_transient());
        assert!(!rollback.is_transient());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = MatchmakingError::InvalidRequest {
            reason: "Customer ID cannot be empty".to_string(),
        }
        .into();

        let typed = err.downcast_ref::<MatchmakingError>().unwrap();
        assert!(matches!(typed, MatchmakingError::InvalidRequest { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid request: Customer ID cannot be empty"
        );
    }
}
