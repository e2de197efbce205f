//! Live join counter fan-out

pub mod counter;

pub use counter::{changed_contests, JoinCounterBroadcaster};
