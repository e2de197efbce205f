//! Shared store access
//!
//! The engine never talks to a store client directly; it goes through
//! [`StoreGateway`], with an in-process and a Redis implementation.

pub mod gateway;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod relational;

pub use self::redis::RedisStore;
pub use gateway::StoreGateway;
pub use memory::InMemoryStore;
pub use relational::{PrizeBreakupEntry, PrizeBreakupSource, StaticPrizeBreakupSource};
