//! Round scheduling
//!
//! Each room runs a chain of deferred transitions: pre-start at the game
//! start instant, then one round-end timer per round. Timers live in-process;
//! their due times are mirrored in the shared store so a restarted process
//! can recover them.

pub mod deadlines;
pub mod rounds;
pub mod timer;

pub use deadlines::{DeadlineIndex, ScheduledTransition, TransitionPhase};
pub use rounds::{RoundScheduler, SchedulerSettings};
pub use timer::{TaskTimers, TimerTask};
