//! Key layout for everything the service keeps in the shared store

use crate::types::TimeSlot;

/// Cached contest catalog (JSON array of contest definitions)
pub const CONTEST_CATALOG: &str = "contest:catalog";

/// Per-contest join counter hash, field = contest id
pub const JOIN_COUNTER: &str = "contest:join-counter";

/// Due-time index of pending room transitions
pub const SCHEDULE_INDEX: &str = "contest:schedule";

/// Set of blocked user ids
pub const BLOCKED_USERS: &str = "user:blocked";

/// Wallet balances hash, field = user id
pub const WALLET_BALANCES: &str = "wallet:balance";

pub fn room(contest_id: &str, time_slot: TimeSlot) -> String {
    format!("contest:room:{}:{}", contest_id, time_slot)
}

pub fn joined_players(contest_id: &str, time_slot: TimeSlot) -> String {
    format!("contest:room:{}:{}:joined", contest_id, time_slot)
}

/// Per-round ticket hash, field = user id
pub fn user_tickets(contest_id: &str, time_slot: TimeSlot, round: u32) -> String {
    format!("contest:tickets:{}:{}:{}", contest_id, time_slot, round)
}

/// Per-round generic ticket queue used when a player has no personal ticket
pub fn ticket_queue(contest_id: &str, time_slot: TimeSlot, round: u32) -> String {
    format!("contest:ticket-queue:{}:{}:{}", contest_id, time_slot, round)
}

/// Players advancing out of `round`, written by the game servers
pub fn round_winners(round: u32, contest_id: &str, time_slot: TimeSlot) -> String {
    format!("contest:winners:{}:{}:{}", round, contest_id, time_slot)
}

pub fn prize_breakup(contest_id: &str) -> String {
    format!("contest:prize-breakup:{}", contest_id)
}

/// Claim held by the process firing one scheduled transition
pub fn schedule_claim(member: &str) -> String {
    format!("contest:schedule-claim:{}", member)
}

/// Players that already marked presence in a room
pub fn active_users(contest_id: &str, time_slot: TimeSlot) -> String {
    format!("user:active:{}:{}", contest_id, time_slot)
}

/// Ticket currently assigned to a user
pub fn running_contest(user_id: &str) -> String {
    format!("user:running:{}", user_id)
}

/// Preferred opponent per user for one room, field = user id
pub fn preferred_opponents(contest_id: &str, time_slot: TimeSlot) -> String {
    format!("contest:preferred:{}:{}", contest_id, time_slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_keys_are_distinct() {
        assert_ne!(room("c1", 10), joined_players("c1", 10));
        assert_ne!(user_tickets("c1", 10, 1), user_tickets("c1", 10, 2));
        assert_ne!(user_tickets("c1", 10, 1), ticket_queue("c1", 10, 1));
        assert_eq!(round_winners(2, "c1", 10), "contest:winners:2:c1:10");
    }
}
