//! Utility functions for the contest orchestration service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique room ID
pub fn generate_room_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new unique game ID
pub fn generate_game_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Ratio of joined players to the room's maximum. A zero maximum is treated as one.
pub fn fill_ratio(joined: usize, max_users: u32) -> f64 {
    joined as f64 / max_users.max(1) as f64
}

/// Log prefix identifying a room across processes
pub fn room_tag(contest_id: &str, time_slot: i64) -> String {
    format!("{}-{}", contest_id, time_slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_room_id(), generate_room_id());
        assert_ne!(generate_game_id(), generate_game_id());
    }

    #[test]
    fn test_fill_ratio() {
        assert_eq!(fill_ratio(49, 100), 0.49);
        assert_eq!(fill_ratio(50, 100), 0.5);
        assert_eq!(fill_ratio(3, 0), 3.0);
    }

    #[test]
    fn test_room_tag() {
        assert_eq!(room_tag("c1", 1000), "c1-1000");
    }
}
