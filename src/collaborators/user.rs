//! User-facing collaborator: eligibility, presence bookkeeping and game joins

use crate::amqp::publisher::EventPublisher;
use crate::error::{ContestError, Result};
use crate::store::{keys, StoreGateway};
use crate::types::{ContestDefinition, GameJoinDispatch, GameTicket, OpponentLink, TimeSlot, User};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Operations the engine needs from the user system
#[async_trait]
pub trait UserService: Send + Sync {
    /// Testers may join while joining is disabled
    async fn is_tester(&self, user: &User) -> Result<bool>;

    async fn is_blocked(&self, user_id: &str) -> Result<bool>;

    /// Whether the user already marked presence in this room
    async fn is_active_user(&self, contest_id: &str, time_slot: TimeSlot, user_id: &str)
        -> Result<bool>;

    /// Ticket most recently assigned to the user
    async fn running_contest(&self, user_id: &str) -> Result<Option<GameTicket>>;

    /// Record presence. Returns true for the first mark.
    async fn mark_active_user(&self, contest_id: &str, time_slot: TimeSlot, user_id: &str)
        -> Result<bool>;

    async fn save_assigned_ticket(&self, user_id: &str, ticket: &GameTicket) -> Result<()>;

    /// Preferred opponent for the user in this contest slot, if any
    async fn preferred_opponent(
        &self,
        user_id: &str,
        contest: &ContestDefinition,
        time_slot: TimeSlot,
    ) -> Result<Option<OpponentLink>>;

    /// Hand a ticket to the game-assignment service
    async fn join_game(&self, user_id: &str, ticket: &GameTicket) -> Result<()>;
}

/// User service backed by the shared store, dispatching joins over the event publisher
pub struct StoreUserService {
    store: Arc<dyn StoreGateway>,
    publisher: Arc<dyn EventPublisher>,
    testers: HashSet<String>,
    record_ttl: Duration,
}

impl StoreUserService {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        publisher: Arc<dyn EventPublisher>,
        testers: impl IntoIterator<Item = String>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            testers: testers.into_iter().collect(),
            record_ttl,
        }
    }

    pub async fn block_user(&self, user_id: &str) -> Result<()> {
        self.store.set_add(keys::BLOCKED_USERS, user_id).await?;
        Ok(())
    }

    /// Register a preferred opponent for `user_id` in a contest slot
    pub async fn set_preferred_opponent(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
        opponent: &OpponentLink,
    ) -> Result<()> {
        let payload = serde_json::to_string(opponent).map_err(|e| ContestError::InternalError {
            message: format!("Failed to serialize opponent: {}", e),
        })?;
        let key = keys::preferred_opponents(contest_id, time_slot);
        self.store
            .hash_set(&key, &[(user_id.to_string(), payload)])
            .await?;
        self.store.expire(&key, self.record_ttl).await
    }
}

#[async_trait]
impl UserService for StoreUserService {
    async fn is_tester(&self, user: &User) -> Result<bool> {
        Ok(self.testers.contains(&user.id))
    }

    async fn is_blocked(&self, user_id: &str) -> Result<bool> {
        self.store.set_is_member(keys::BLOCKED_USERS, user_id).await
    }

    async fn is_active_user(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        self.store
            .set_is_member(&keys::active_users(contest_id, time_slot), user_id)
            .await
    }

    async fn running_contest(&self, user_id: &str) -> Result<Option<GameTicket>> {
        match self.store.get(&keys::running_contest(user_id)).await? {
            Some(raw) => {
                let ticket = serde_json::from_str(&raw).map_err(|e| ContestError::StoreError {
                    message: format!("Malformed running ticket for {}: {}", user_id, e),
                })?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    async fn mark_active_user(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        let key = keys::active_users(contest_id, time_slot);
        let added = self.store.set_add(&key, user_id).await?;
        if added {
            self.store.expire(&key, self.record_ttl).await?;
        }
        Ok(added)
    }

    async fn save_assigned_ticket(&self, user_id: &str, ticket: &GameTicket) -> Result<()> {
        let payload = serde_json::to_string(ticket).map_err(|e| ContestError::InternalError {
            message: format!("Failed to serialize ticket: {}", e),
        })?;
        self.store
            .set(&keys::running_contest(user_id), &payload, Some(self.record_ttl))
            .await
    }

    async fn preferred_opponent(
        &self,
        user_id: &str,
        contest: &ContestDefinition,
        time_slot: TimeSlot,
    ) -> Result<Option<OpponentLink>> {
        let raw = self
            .store
            .hash_get(&keys::preferred_opponents(&contest.id, time_slot), user_id)
            .await?;

        match raw {
            Some(raw) => match serde_json::from_str::<OpponentLink>(&raw) {
                Ok(link) => Ok(Some(link)),
                Err(e) => {
                    debug!("Ignoring malformed preferred opponent for {}: {}", user_id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn join_game(&self, user_id: &str, ticket: &GameTicket) -> Result<()> {
        self.publisher
            .publish_game_join(GameJoinDispatch {
                user_id: user_id.to_string(),
                ticket: ticket.clone(),
                timestamp: current_timestamp(),
            })
            .await
    }
}
