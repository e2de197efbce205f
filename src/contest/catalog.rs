//! Contest catalog: read-through view of contest definitions
//!
//! The catalog list is published to the shared store by the contest admin
//! system, with `contestStart` in seconds. Loading converts it to
//! milliseconds, derives the game start and attaches live join totals.

use crate::error::{ContestError, Result};
use crate::store::{keys, StoreGateway};
use crate::types::{ContestDefinition, ContestId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CachedCatalog {
    loaded_at: Instant,
    contests: Vec<ContestDefinition>,
}

/// Read-through cache over the catalog key
pub struct ContestCatalog {
    store: Arc<dyn StoreGateway>,
    cache: RwLock<Option<CachedCatalog>>,
    cache_ttl: Duration,
}

impl ContestCatalog {
    /// `cache_ttl` of zero disables the local cache
    pub fn new(store: Arc<dyn StoreGateway>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
            cache_ttl,
        }
    }

    /// All contests with derived fields and live join totals
    pub async fn contest_list(&self) -> Result<Vec<ContestDefinition>> {
        let mut contests = self.definitions().await?;
        let counters = self.join_counters().await?;

        for contest in contests.iter_mut() {
            contest.total_joined = counters.get(&contest.id).copied().unwrap_or(0);
        }
        Ok(contests)
    }

    pub async fn contest_by_id(&self, contest_id: &str) -> Result<Option<ContestDefinition>> {
        Ok(self
            .contest_list()
            .await?
            .into_iter()
            .find(|contest| contest.id == contest_id))
    }

    /// Snapshot of every per-contest join total
    pub async fn join_counters(&self) -> Result<HashMap<ContestId, i64>> {
        let raw = self.store.hash_get_all(keys::JOIN_COUNTER).await?;
        let mut counters = HashMap::with_capacity(raw.len());
        for (contest_id, value) in raw {
            match value.parse::<i64>() {
                Ok(count) => {
                    counters.insert(contest_id, count);
                }
                Err(_) => warn!(
                    "Ignoring malformed join counter for contest {}: {}",
                    contest_id, value
                ),
            }
        }
        Ok(counters)
    }

    /// Atomically bump a contest's join total
    pub async fn increment_join_counter(&self, contest_id: &str) -> Result<i64> {
        self.store
            .hash_increment(keys::JOIN_COUNTER, contest_id, 1)
            .await
    }

    /// Publish a catalog in the stored layout (start in seconds). Used by
    /// seeding tools and tests.
    pub async fn store_catalog(&self, contests: &[ContestDefinition]) -> Result<()> {
        let stored: Vec<ContestDefinition> = contests
            .iter()
            .cloned()
            .map(|mut contest| {
                contest.contest_start_ms /= 1000;
                contest.game_start_ms = 0;
                contest.total_joined = 0;
                contest
            })
            .collect();

        let payload = serde_json::to_string(&stored).map_err(|e| ContestError::InternalError {
            message: format!("Failed to serialize catalog: {}", e),
        })?;
        self.store.set(keys::CONTEST_CATALOG, &payload, None).await?;
        self.invalidate();
        Ok(())
    }

    /// Drop the local cache so the next read goes to the store
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    async fn definitions(&self) -> Result<Vec<ContestDefinition>> {
        if let Some(contests) = self.cached() {
            return Ok(contests);
        }

        let contests = match self.store.get(keys::CONTEST_CATALOG).await? {
            Some(raw) => parse_catalog(&raw)?,
            None => {
                debug!("Contest catalog is empty");
                Vec::new()
            }
        };

        if !self.cache_ttl.is_zero() {
            if let Ok(mut cache) = self.cache.write() {
                *cache = Some(CachedCatalog {
                    loaded_at: Instant::now(),
                    contests: contests.clone(),
                });
            }
        }
        Ok(contests)
    }

    fn cached(&self) -> Option<Vec<ContestDefinition>> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let cache = self.cache.read().ok()?;
        cache
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.cache_ttl)
            .map(|c| c.contests.clone())
    }
}

/// Parse the stored catalog and derive absolute instants
fn parse_catalog(raw: &str) -> Result<Vec<ContestDefinition>> {
    let mut contests: Vec<ContestDefinition> =
        serde_json::from_str(raw).map_err(|e| ContestError::StoreError {
            message: format!("Malformed contest catalog: {}", e),
        })?;

    for contest in contests.iter_mut() {
        contest.contest_start_ms *= 1000;
        contest.game_start_ms = contest.contest_start_ms + contest.waiting_time_ms;
    }
    Ok(contests)
}
