//! Configuration management for the contest service
//!
//! Configuration comes from a TOML file or environment variables, with
//! defaults for everything and validation before use.

pub mod app;

pub use app::{
    validate_config, AmqpSettings, AppConfig, ServiceSettings, StoreSettings, TournamentSettings,
};
