//! Common types used throughout the contest orchestration service

use crate::contest::lifecycle::RoomState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a contest in the catalog
pub type ContestId = String;

/// Identifier of a player
pub type UserId = String;

/// Identifier shared by every seat of one game instance
pub type GameId = Uuid;

/// Game-start instant of a room, epoch milliseconds. Rooms are keyed by
/// (contest, time slot).
pub type TimeSlot = i64;

/// Contest definition as served by the catalog.
///
/// Field names follow the catalog cache layout. `contest_start_ms`,
/// `game_start_ms` and `total_joined` are derived when the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestDefinition {
    #[serde(rename = "cid")]
    pub id: ContestId,
    #[serde(rename = "cn", default)]
    pub name: String,
    /// Absolute contest start (epoch ms once loaded)
    #[serde(rename = "contestStart")]
    pub contest_start_ms: i64,
    /// Offset between contest start and game start, ms
    #[serde(rename = "WaitingTime", default)]
    pub waiting_time_ms: i64,
    #[serde(rename = "GameStartTime", default)]
    pub game_start_ms: i64,
    /// Seats per game instance
    #[serde(rename = "tt")]
    pub capacity: u32,
    #[serde(rename = "MaxUsers")]
    pub max_users: u32,
    #[serde(rename = "NoOfRound", default = "default_rounds")]
    pub no_of_rounds: u32,
    /// Round duration in seconds
    #[serde(rename = "Duration")]
    pub round_duration_secs: u64,
    #[serde(rename = "isPrivate", default)]
    pub is_private: bool,
    #[serde(rename = "IsXFac", default)]
    pub allows_preferred_opponent: bool,
    #[serde(rename = "isTournamentContest", default)]
    pub is_tournament: bool,
    #[serde(rename = "jf", default)]
    pub entry_fee: f64,
    #[serde(rename = "wa", default)]
    pub prize_pool: f64,
    #[serde(rename = "total_winners", default)]
    pub winner_count: u32,
    #[serde(default)]
    pub total_joined: i64,
    /// Catalog fields not interpreted by the engine, passed through to clients
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_rounds() -> u32 {
    1
}

impl ContestDefinition {
    /// Round duration in milliseconds
    pub fn round_duration_ms(&self) -> i64 {
        (self.round_duration_secs as i64) * 1000
    }

    /// Whether joining is open at `now_ms`
    pub fn has_started(&self, now_ms: i64) -> bool {
        now_ms >= self.contest_start_ms
    }
}

/// Authenticated caller, supplied by the session layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Numeric/mobile id used by the game servers
    #[serde(default)]
    pub mid: Option<i64>,
    #[serde(default)]
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mid: None,
            name: String::new(),
        }
    }
}

/// Matchmaking tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePriority {
    /// Try to seat each player against a preferred opponent first
    PreferredOpponentFirst,
    /// Sequential fixed-capacity grouping
    Plain,
}

impl std::fmt::Display for GamePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GamePriority::PreferredOpponentFirst => write!(f, "preferred_opponent_first"),
            GamePriority::Plain => write!(f, "plain"),
        }
    }
}

/// Linkage to a preferred opponent returned by the user service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentLink {
    pub opponent_id: UserId,
    pub level: u32,
    pub opponent_mid: Option<i64>,
    pub log_id: Option<String>,
}

/// Tier-specific ticket metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketMetadata {
    /// Seat in a fixed-capacity game; `priority` is the tier that produced it
    PlainAssignment {
        priority: GamePriority,
        next_round_at_ms: i64,
    },
    PreferredOpponentAssignment {
        next_round_at_ms: i64,
        opponent: OpponentLink,
        opponent_seat: u32,
    },
}

impl TicketMetadata {
    pub fn priority(&self) -> GamePriority {
        match self {
            TicketMetadata::PlainAssignment { priority, .. } => *priority,
            TicketMetadata::PreferredOpponentAssignment { .. } => {
                GamePriority::PreferredOpponentFirst
            }
        }
    }

    pub fn next_round_at_ms(&self) -> i64 {
        match self {
            TicketMetadata::PlainAssignment {
                next_round_at_ms, ..
            }
            | TicketMetadata::PreferredOpponentAssignment {
                next_round_at_ms, ..
            } => *next_round_at_ms,
        }
    }
}

/// One player's seat assignment for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTicket {
    pub game_id: GameId,
    pub capacity: u32,
    pub server_address: String,
    pub player_pos: u32,
    pub contest_id: ContestId,
    pub time_slot: TimeSlot,
    /// Advisory budget for the game server, ms
    pub game_server_timeout_ms: u64,
    pub game_play_time_ms: i64,
    pub round: u32,
    pub metadata: TicketMetadata,
}

/// Per-contest join total change pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDelta {
    pub contest_id: ContestId,
    pub player_joined: i64,
}

/// Batched counter event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterUpdate {
    pub deltas: Vec<CounterDelta>,
    pub timestamp: DateTime<Utc>,
}

/// Join request dispatched to the game-assignment collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameJoinDispatch {
    pub user_id: UserId,
    pub ticket: GameTicket,
    pub timestamp: DateTime<Utc>,
}

/// Emitted whenever a room changes lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStateChanged {
    pub room_id: String,
    pub contest_id: ContestId,
    pub time_slot: TimeSlot,
    pub from: RoomState,
    pub to: RoomState,
    pub current_round: u32,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all published events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContestEvent {
    CounterUpdate(CounterUpdate),
    GameJoinDispatch(GameJoinDispatch),
    RoomStateChanged(RoomStateChanged),
}
