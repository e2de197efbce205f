//! Room lifecycle state machine
//!
//! States only move forward:
//! `AcceptJoining -> PreStartingConfig -> GameStart -> (Completed | Cancelled)`,
//! where `Cancelled` is reachable only from `PreStartingConfig` and
//! `GameStart -> GameStart` is the round increment.

use crate::error::{ContestError, Result};
use serde::{Deserialize, Serialize};

/// Possible states of a contest room. Stored as the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RoomState {
    /// Players may subscribe
    AcceptJoining,
    /// Pre-start running: fill check and first-round matchmaking
    PreStartingConfig,
    /// Rounds in progress
    GameStart,
    /// Not enough players (terminal)
    Cancelled,
    /// Final round finished (terminal)
    Completed,
}

impl RoomState {
    pub fn code(self) -> u8 {
        match self {
            RoomState::AcceptJoining => 1,
            RoomState::PreStartingConfig => 2,
            RoomState::GameStart => 3,
            RoomState::Cancelled => 4,
            RoomState::Completed => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RoomState::AcceptJoining),
            2 => Some(RoomState::PreStartingConfig),
            3 => Some(RoomState::GameStart),
            4 => Some(RoomState::Cancelled),
            5 => Some(RoomState::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoomState::Cancelled | RoomState::Completed)
    }

    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(self, next: RoomState) -> bool {
        matches!(
            (self, next),
            (RoomState::AcceptJoining, RoomState::PreStartingConfig)
                | (RoomState::PreStartingConfig, RoomState::Cancelled)
                | (RoomState::PreStartingConfig, RoomState::GameStart)
                | (RoomState::GameStart, RoomState::GameStart)
                | (RoomState::GameStart, RoomState::Completed)
        )
    }

    /// Validate `self -> next`, returning the new state
    pub fn transition(self, next: RoomState) -> Result<RoomState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ContestError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            }
            .into())
        }
    }

    /// Metric label
    pub fn as_label(self) -> &'static str {
        match self {
            RoomState::AcceptJoining => "accept_joining",
            RoomState::PreStartingConfig => "prestarting_config",
            RoomState::GameStart => "game_start",
            RoomState::Cancelled => "cancelled",
            RoomState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomState::AcceptJoining => write!(f, "AcceptJoining"),
            RoomState::PreStartingConfig => write!(f, "PreStartingConfig"),
            RoomState::GameStart => write!(f, "GameStart"),
            RoomState::Cancelled => write!(f, "Cancelled"),
            RoomState::Completed => write!(f, "Completed"),
        }
    }
}

impl From<RoomState> for u8 {
    fn from(state: RoomState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for RoomState {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        RoomState::from_code(code).ok_or_else(|| format!("unknown room state code {}", code))
    }
}
