//! Grouping of ordered players into game instances
//!
//! Grouping is pure: preferred-opponent links are resolved by the caller and
//! handed in through a lookup closure, so both tiers can be exercised without
//! a store.

use crate::types::{OpponentLink, UserId};

/// Seats in a preferred-opponent game
pub const PREFERRED_GROUP_WIDTH: u32 = 2;

/// One game instance worth of players
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerGroup {
    /// Players seated from this input, in seat order
    pub players: Vec<UserId>,
    /// Seats in the game instance
    pub width: u32,
    /// Set for preferred-opponent games; the opponent takes the seat after
    /// the player
    pub opponent: Option<OpponentLink>,
}

impl PlayerGroup {
    pub fn is_preferred(&self) -> bool {
        self.opponent.is_some()
    }
}

/// Sequential chunks of `capacity`. The final group is left partial.
pub fn plain_groups(players: &[UserId], capacity: u32) -> Vec<PlayerGroup> {
    let width = capacity.max(1);
    players
        .chunks(width as usize)
        .map(|chunk| PlayerGroup {
            players: chunk.to_vec(),
            width,
            opponent: None,
        })
        .collect()
}

/// Preferred-opponent grouping.
///
/// Walks the input in order. A player with a preferred opponent gets a
/// two-seat game to themselves; otherwise the next `capacity` players
/// (starting with that player) share one game. `lookup` is only asked about
/// the player heading each new group.
pub fn preferred_groups<F>(players: &[UserId], capacity: u32, mut lookup: F) -> Vec<PlayerGroup>
where
    F: FnMut(&str) -> Option<OpponentLink>,
{
    let mut groups = Vec::new();
    let mut index = 0;

    while index < players.len() {
        let group = preferred_group_at(players, index, capacity, lookup(&players[index]));
        index += group.players.len();
        groups.push(group);
    }

    groups
}

/// The preferred-tier group headed by `players[start]`, given the head's
/// opponent lookup result
pub fn preferred_group_at(
    players: &[UserId],
    start: usize,
    capacity: u32,
    opponent: Option<OpponentLink>,
) -> PlayerGroup {
    if let Some(opponent) = opponent {
        return PlayerGroup {
            players: vec![players[start].clone()],
            width: PREFERRED_GROUP_WIDTH,
            opponent: Some(opponent),
        };
    }

    let width = capacity.max(1);
    let end = (start + width as usize).min(players.len());
    PlayerGroup {
        players: players[start..end].to_vec(),
        width,
        opponent: None,
    }
}

/// Split joined players between the two pre-start tiers.
///
/// The preferred tier covers the first `min(max_users - joined, joined)`
/// players (zero once the room is full); the plain tier takes the rest.
pub fn split_for_pre_start(players: &[UserId], max_users: u32) -> (&[UserId], &[UserId]) {
    let joined = players.len();
    let remaining = (max_users as usize).saturating_sub(joined);
    players.split_at(remaining.min(joined))
}
