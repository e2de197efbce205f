//! Durable due-time index of pending room transitions
//!
//! Every armed transition is also recorded in a sorted set scored by its due
//! time, so a restarted process can pick up where a dead one left off. A claim
//! key per transition keeps two processes from firing the same one.

use crate::error::{ContestError, Result};
use crate::store::{keys, StoreGateway};
use crate::types::{ContestId, TimeSlot};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Which step of the room timer chain is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionPhase {
    PreStart,
    /// End of the given round
    NextRound(u32),
}

impl TransitionPhase {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            TransitionPhase::PreStart => "pre_start",
            TransitionPhase::NextRound(_) => "next_round",
        }
    }
}

impl fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionPhase::PreStart => write!(f, "pre_start"),
            TransitionPhase::NextRound(round) => write!(f, "round:{}", round),
        }
    }
}

/// A pending transition for one room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduledTransition {
    pub contest_id: ContestId,
    pub time_slot: TimeSlot,
    pub phase: TransitionPhase,
}

impl ScheduledTransition {
    pub fn new(contest_id: impl Into<String>, time_slot: TimeSlot, phase: TransitionPhase) -> Self {
        Self {
            contest_id: contest_id.into(),
            time_slot,
            phase,
        }
    }

    /// Index member, `contest|slot|phase`
    pub fn member(&self) -> String {
        format!("{}|{}|{}", self.contest_id, self.time_slot, self.phase)
    }

    /// Parse an index member. Contest ids may themselves contain `|`.
    pub fn parse(member: &str) -> Result<Self> {
        let malformed = || -> anyhow::Error {
            ContestError::StoreError {
                message: format!("Malformed schedule entry '{}'", member),
            }
            .into()
        };

        let mut parts = member.rsplitn(3, '|');
        let phase = parts.next().ok_or_else(malformed)?;
        let time_slot = parts
            .next()
            .and_then(|slot| slot.parse::<TimeSlot>().ok())
            .ok_or_else(malformed)?;
        let contest_id = parts.next().filter(|id| !id.is_empty()).ok_or_else(malformed)?;

        let phase = match phase {
            "pre_start" => TransitionPhase::PreStart,
            other => other
                .strip_prefix("round:")
                .and_then(|round| round.parse().ok())
                .map(TransitionPhase::NextRound)
                .ok_or_else(malformed)?,
        };

        Ok(Self::new(contest_id, time_slot, phase))
    }

    pub fn belongs_to(&self, contest_id: &str, time_slot: TimeSlot) -> bool {
        self.contest_id == contest_id && self.time_slot == time_slot
    }
}

impl fmt::Display for ScheduledTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}] {}", self.contest_id, self.time_slot, self.phase)
    }
}

/// Store-backed schedule of pending transitions
#[derive(Clone)]
pub struct DeadlineIndex {
    store: Arc<dyn StoreGateway>,
    claim_ttl: Duration,
}

impl DeadlineIndex {
    pub fn new(store: Arc<dyn StoreGateway>, claim_ttl: Duration) -> Self {
        Self { store, claim_ttl }
    }

    pub async fn record(&self, transition: &ScheduledTransition, due_ms: i64) -> Result<()> {
        self.store
            .sorted_add(keys::SCHEDULE_INDEX, &transition.member(), due_ms)
            .await
    }

    pub async fn remove(&self, transition: &ScheduledTransition) -> Result<bool> {
        self.store
            .sorted_remove(keys::SCHEDULE_INDEX, &transition.member())
            .await
    }

    /// Drop every pending entry of one room
    pub async fn remove_room(&self, contest_id: &str, time_slot: TimeSlot) -> Result<usize> {
        let mut removed = 0;
        for (transition, _) in self.pending().await? {
            if transition.belongs_to(contest_id, time_slot) && self.remove(&transition).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every pending entry with its due time, earliest first. Unparseable
    /// entries are skipped.
    pub async fn pending(&self) -> Result<Vec<(ScheduledTransition, i64)>> {
        let entries = self
            .store
            .sorted_range_by_score(keys::SCHEDULE_INDEX, i64::MIN, i64::MAX)
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|(member, due)| match ScheduledTransition::parse(&member) {
                Ok(transition) => Some((transition, due)),
                Err(e) => {
                    debug!("Skipping schedule entry: {}", e);
                    None
                }
            })
            .collect())
    }

    pub async fn pending_for_room(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
    ) -> Result<Vec<(ScheduledTransition, i64)>> {
        Ok(self
            .pending()
            .await?
            .into_iter()
            .filter(|(transition, _)| transition.belongs_to(contest_id, time_slot))
            .collect())
    }

    /// Whether `transition` still has an entry in the index
    pub async fn is_pending(&self, transition: &ScheduledTransition) -> Result<bool> {
        Ok(self
            .pending()
            .await?
            .iter()
            .any(|(pending, _)| pending == transition))
    }

    /// Take the firing claim. False means another process holds it.
    pub async fn claim(&self, transition: &ScheduledTransition) -> Result<bool> {
        self.store
            .set_if_absent(
                &keys::schedule_claim(&transition.member()),
                "1",
                Some(self.claim_ttl),
            )
            .await
    }

    pub async fn release(&self, transition: &ScheduledTransition) -> Result<()> {
        self.store
            .delete(&keys::schedule_claim(&transition.member()))
            .await
    }
}
