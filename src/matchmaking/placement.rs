//! Game server selection

use crate::error::{ContestError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the game server that hosts the next game instance
pub trait ServerPlacement: Send + Sync {
    /// Server for a new game instance; advances the rotation
    fn next_server(&self) -> String;

    /// Server the next game instance would land on, without advancing
    fn current_server(&self) -> String;
}

/// Cycles through a fixed list of game server addresses
#[derive(Debug)]
pub struct RoundRobinPlacement {
    addresses: Vec<String>,
    cursor: AtomicUsize,
}

impl RoundRobinPlacement {
    pub fn new(addresses: Vec<String>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(ContestError::ConfigurationError {
                message: "At least one game server address is required".to_string(),
            }
            .into());
        }

        Ok(Self {
            addresses,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}

impl ServerPlacement for RoundRobinPlacement {
    fn next_server(&self) -> String {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        self.addresses[index].clone()
    }

    fn current_server(&self) -> String {
        let index = self.cursor.load(Ordering::Relaxed) % self.addresses.len();
        self.addresses[index].clone()
    }
}
