//! Error types for the contest orchestration service
//!
//! Typed failures live in [`ContestError`]; everything is carried through the
//! crate as `anyhow::Error` and downcast at the facade boundary.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Failures raised by the orchestration engine and its collaborators
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContestError {
    #[error("Server is under maintenance")]
    ServerMaintenance,

    #[error("User is blocked: {user_id}")]
    UserBlocked { user_id: String },

    #[error("Contest not available: {contest_id}")]
    ContestNotAvailable { contest_id: String },

    #[error("User {user_id} already joined contest {contest_id}")]
    AlreadyJoined { contest_id: String, user_id: String },

    #[error("Invalid room state for {room_id}: {state}")]
    InvalidRoomState { room_id: String, state: String },

    #[error("Failed to deduct balance for user {user_id}")]
    InsufficientBalance { user_id: String },

    #[error("User {user_id} failed to join contest {contest_id}")]
    JoinFailed { contest_id: String, user_id: String },

    #[error("Join window expired for contest {contest_id} at {game_start_ms}")]
    WindowExpired { contest_id: String, game_start_ms: i64 },

    #[error("No tournament found for {contest_id}-{time_slot}")]
    RoomNotFound { contest_id: String, time_slot: i64 },

    #[error("Tournament {contest_id}-{time_slot} has not started yet")]
    EarlyPresence { contest_id: String, time_slot: i64 },

    #[error("Tournament {contest_id}-{time_slot} was cancelled")]
    TournamentCancelled { contest_id: String, time_slot: i64 },

    #[error("Tournament {contest_id}-{time_slot} is completed")]
    TournamentCompleted { contest_id: String, time_slot: i64 },

    #[error("Unable to get ticket for user {user_id}")]
    TicketUnavailable { user_id: String },

    #[error("No prize breakup found for contest {contest_id}")]
    NoPrizeBreakup { contest_id: String },

    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Scheduling failed: {reason}")]
    SchedulingFailed { reason: String },

    #[error("Store operation failed: {message}")]
    StoreError { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl ContestError {
    /// Message shown to the client for this failure
    pub fn client_message(&self) -> &'static str {
        match self {
            ContestError::ServerMaintenance => "Server under maintenance",
            ContestError::UserBlocked { .. } => "User is blocked",
            ContestError::ContestNotAvailable { .. } => "Contest not available",
            ContestError::AlreadyJoined { .. } => "User already joined this contest",
            ContestError::InvalidRoomState { .. } => "Invalid room state",
            ContestError::InsufficientBalance { .. } => "Failed to deduct money for contest",
            ContestError::JoinFailed { .. } => "User failed to join in this contest",
            ContestError::WindowExpired { .. } => "Time over",
            ContestError::RoomNotFound { .. } => "No Tournament Found",
            ContestError::EarlyPresence { .. } => "Early Tournament Presence",
            ContestError::TournamentCancelled { .. } => "Tournament Cancelled",
            ContestError::TournamentCompleted { .. } => "Tournament Completed",
            ContestError::TicketUnavailable { .. } => "Unable to get ticket",
            ContestError::NoPrizeBreakup { .. } => "No prize breakup found",
            ContestError::IllegalTransition { .. }
            | ContestError::SchedulingFailed { .. }
            | ContestError::StoreError { .. }
            | ContestError::AmqpConnectionFailed { .. }
            | ContestError::ConfigurationError { .. }
            | ContestError::InternalError { .. } => "Something went wrong",
        }
    }

    /// True for failures caused by the caller rather than by the service
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ContestError::IllegalTransition { .. }
                | ContestError::SchedulingFailed { .. }
                | ContestError::StoreError { .. }
                | ContestError::AmqpConnectionFailed { .. }
                | ContestError::ConfigurationError { .. }
                | ContestError::InternalError { .. }
        )
    }
}

impl From<redis::RedisError> for ContestError {
    fn from(e: redis::RedisError) -> Self {
        ContestError::StoreError {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        let err = ContestError::AlreadyJoined {
            contest_id: "c1".to_string(),
            user_id: "u1".to_string(),
        };
        assert_eq!(err.client_message(), "User already joined this contest");
        assert!(err.is_client_error());

        let err = ContestError::StoreError {
            message: "boom".to_string(),
        };
        assert_eq!(err.client_message(), "Something went wrong");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = ContestError::TicketUnavailable {
            user_id: "u1".to_string(),
        }
        .into();
        assert!(matches!(
            err.downcast_ref::<ContestError>(),
            Some(ContestError::TicketUnavailable { .. })
        ));
    }
}
