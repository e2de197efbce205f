//! Balance collaborator charging contest entry fees

use crate::error::Result;
use crate::store::{keys, StoreGateway};
use crate::types::{ContestDefinition, TimeSlot, User};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wallet operations used when joining a contest
#[async_trait]
pub trait TransactionService: Send + Sync {
    /// Charge the entry fee. Returns false when the user cannot pay.
    async fn deduct_entry_fee(
        &self,
        user: &User,
        contest: &ContestDefinition,
        time_slot: TimeSlot,
    ) -> Result<bool>;
}

/// Entry fee in minor currency units
pub fn fee_in_minor_units(fee: f64) -> i64 {
    (fee * 100.0).round() as i64
}

/// Wallet kept as integer minor-unit balances in the shared store
pub struct StoreWalletService {
    store: Arc<dyn StoreGateway>,
}

impl StoreWalletService {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }

    /// Add funds, returning the new balance in minor units
    pub async fn credit(&self, user_id: &str, amount_minor: i64) -> Result<i64> {
        self.store
            .hash_increment(keys::WALLET_BALANCES, user_id, amount_minor)
            .await
    }

    pub async fn balance(&self, user_id: &str) -> Result<i64> {
        Ok(self
            .store
            .hash_get(keys::WALLET_BALANCES, user_id)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl TransactionService for StoreWalletService {
    async fn deduct_entry_fee(
        &self,
        user: &User,
        contest: &ContestDefinition,
        time_slot: TimeSlot,
    ) -> Result<bool> {
        let fee = fee_in_minor_units(contest.entry_fee);
        if fee <= 0 {
            return Ok(true);
        }

        let remaining = self
            .store
            .hash_increment(keys::WALLET_BALANCES, &user.id, -fee)
            .await?;

        if remaining < 0 {
            self.store
                .hash_increment(keys::WALLET_BALANCES, &user.id, fee)
                .await?;
            warn!(
                "Insufficient balance for user {} in contest {}-{}",
                user.id, contest.id, time_slot
            );
            return Ok(false);
        }

        debug!(
            "Charged {} to user {} for contest {}-{}, remaining {}",
            fee, user.id, contest.id, time_slot, remaining
        );
        Ok(true)
    }
}
