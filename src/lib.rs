//! Mega Contest - tournament orchestration for scheduled multi-round contests
//!
//! This crate provides contest rooms shared across processes through a
//! key-value store, deferred round transitions with a durable schedule,
//! tiered matchmaking, join counter broadcasting and the client-facing
//! orchestration surface.

pub mod amqp;
pub mod broadcast;
pub mod collaborators;
pub mod config;
pub mod contest;
pub mod error;
pub mod facade;
pub mod matchmaking;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{ContestError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use contest::{ContestCatalog, RoomRegistry, RoomState};
pub use facade::ContestOrchestrator;
pub use scheduler::RoundScheduler;
pub use store::StoreGateway;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
