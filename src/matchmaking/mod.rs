//! Matchmaking: grouping joined players into game instances and issuing tickets

pub mod engine;
pub mod grouping;
pub mod placement;

pub use engine::{MatchmakingEngine, MatchmakingSettings};
pub use grouping::{
    plain_groups, preferred_group_at, preferred_groups, split_for_pre_start, PlayerGroup,
};
pub use placement::{RoundRobinPlacement, ServerPlacement};
