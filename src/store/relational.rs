//! Relational source for prize breakups
//!
//! The breakup table lives in the relational store and is read through a
//! stored-procedure style lookup. The service only ever reads it.

use crate::error::{ContestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One rank band of a prize breakup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrizeBreakupEntry {
    pub rank_from: u32,
    pub rank_to: u32,
    pub amount: f64,
}

/// Read access to prize breakups
#[async_trait]
pub trait PrizeBreakupSource: Send + Sync {
    /// Breakup rows for a contest, `None` when the source has none
    async fn prize_breakup(&self, contest_id: &str) -> Result<Option<Vec<PrizeBreakupEntry>>>;
}

/// Breakups loaded from configuration or fixtures
#[derive(Debug, Default)]
pub struct StaticPrizeBreakupSource {
    breakups: RwLock<HashMap<String, Vec<PrizeBreakupEntry>>>,
}

impl StaticPrizeBreakupSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_breakup(self, contest_id: &str, rows: Vec<PrizeBreakupEntry>) -> Self {
        if let Ok(mut breakups) = self.breakups.write() {
            breakups.insert(contest_id.to_string(), rows);
        }
        self
    }
}

#[async_trait]
impl PrizeBreakupSource for StaticPrizeBreakupSource {
    async fn prize_breakup(&self, contest_id: &str) -> Result<Option<Vec<PrizeBreakupEntry>>> {
        let breakups = self
            .breakups
            .read()
            .map_err(|_| ContestError::InternalError {
                message: "Failed to acquire prize breakup read lock".to_string(),
            })?;

        Ok(breakups
            .get(contest_id)
            .filter(|rows| !rows.is_empty())
            .cloned())
    }
}
