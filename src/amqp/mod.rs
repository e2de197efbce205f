//! AMQP integration for the contest service
//!
//! Outbound only: counter broadcasts, game-join dispatches and room state
//! changes are published to topic exchanges.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, MeteredEventPublisher,
    MockEventPublisher, PublisherConfig,
};
