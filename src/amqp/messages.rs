//! AMQP message definitions and serialization

use crate::error::{ContestError, Result};
use crate::types::*;
use serde_json;

/// Exchange for contest-level events (counters, room state)
pub const CONTEST_EVENTS_EXCHANGE: &str = "contest.events";
/// Exchange consumed by the game-assignment service
pub const GAME_EVENTS_EXCHANGE: &str = "contest.game_events";

/// Routing keys for events
pub const COUNTER_UPDATED_ROUTING_KEY: &str = "counter.updated";
pub const GAME_JOIN_ROUTING_KEY: &str = "game.join";
pub const ROOM_STATE_CHANGED_ROUTING_KEY: &str = "room.state_changed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ContestError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ContestError::InternalError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Routing helpers for [`ContestEvent`]
pub struct MessageUtils;

impl MessageUtils {
    pub fn routing_key(event: &ContestEvent) -> &'static str {
        match event {
            ContestEvent::CounterUpdate(_) => COUNTER_UPDATED_ROUTING_KEY,
            ContestEvent::GameJoinDispatch(_) => GAME_JOIN_ROUTING_KEY,
            ContestEvent::RoomStateChanged(_) => ROOM_STATE_CHANGED_ROUTING_KEY,
        }
    }

    pub fn exchange(event: &ContestEvent) -> &'static str {
        match event {
            ContestEvent::GameJoinDispatch(_) => GAME_EVENTS_EXCHANGE,
            ContestEvent::CounterUpdate(_) | ContestEvent::RoomStateChanged(_) => {
                CONTEST_EVENTS_EXCHANGE
            }
        }
    }

    /// Reject dispatches the game service cannot act on
    pub fn validate_game_join(dispatch: &GameJoinDispatch) -> Result<()> {
        if dispatch.user_id.is_empty() {
            return Err(ContestError::InternalError {
                message: "Game join without user id".to_string(),
            }
            .into());
        }
        if dispatch.ticket.capacity == 0 {
            return Err(ContestError::InternalError {
                message: format!("Game join for {} has zero capacity", dispatch.user_id),
            }
            .into());
        }
        Ok(())
    }
}
