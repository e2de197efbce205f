//! Ticket generation for one round of a room

use crate::collaborators::UserService;
use crate::contest::RoomRecord;
use crate::error::{ContestError, Result};
use crate::matchmaking::grouping::{plain_groups, preferred_group_at, PlayerGroup};
use crate::matchmaking::placement::ServerPlacement;
use crate::metrics::MetricsCollector;
use crate::store::{keys, StoreGateway};
use crate::types::{
    ContestDefinition, GamePriority, GameTicket, OpponentLink, TicketMetadata, TimeSlot, UserId,
};
use crate::utils::{generate_game_id, now_millis};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for ticket generation
#[derive(Debug, Clone)]
pub struct MatchmakingSettings {
    /// Gap between the end of one round and the next round's start
    pub inter_round_buffer_ms: i64,
    /// Advisory budget handed to the game server
    pub game_server_timeout_ms: u64,
    /// Lifetime of persisted tickets
    pub ticket_ttl: Duration,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            inter_round_buffer_ms: 30_000,
            game_server_timeout_ms: 10_000,
            ticket_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Builds, persists and dispatches game tickets
pub struct MatchmakingEngine {
    store: Arc<dyn StoreGateway>,
    users: Arc<dyn UserService>,
    placement: Arc<dyn ServerPlacement>,
    metrics: Option<Arc<MetricsCollector>>,
    settings: MatchmakingSettings,
}

impl MatchmakingEngine {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        users: Arc<dyn UserService>,
        placement: Arc<dyn ServerPlacement>,
        settings: MatchmakingSettings,
    ) -> Self {
        Self {
            store,
            users,
            placement,
            metrics: None,
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    /// Issue one ticket per player for `round`.
    ///
    /// Tickets are written to the round's ticket hash before any join is
    /// dispatched. Dispatch failures are logged and counted, never returned.
    pub async fn generate_tickets(
        &self,
        priority: GamePriority,
        players: &[UserId],
        room: &RoomRecord,
        contest: &ContestDefinition,
        round: u32,
    ) -> Result<Vec<(UserId, GameTicket)>> {
        if players.is_empty() {
            return Ok(Vec::new());
        }

        let timer = self.metrics.as_ref().map(|m| m.start_timer());
        let groups = match priority {
            GamePriority::Plain => plain_groups(players, room.capacity),
            GamePriority::PreferredOpponentFirst => {
                self.preferred_tier_groups(players, room, contest).await
            }
        };

        let next_round_at_ms =
            now_millis() + room.round_duration_ms + self.settings.inter_round_buffer_ms;
        let tickets: Vec<(UserId, GameTicket)> = groups
            .iter()
            .flat_map(|group| {
                self.tickets_for_group(group, priority, room, round, next_round_at_ms)
            })
            .collect();

        self.persist_tickets(room, round, &tickets).await?;

        info!(
            "[{}] Round {} {} matchmaking: {} players in {} games",
            room.tag(),
            round,
            priority,
            tickets.len(),
            groups.len()
        );

        let mut failures = 0usize;
        for (user_id, ticket) in &tickets {
            if let Err(e) = self.users.join_game(user_id, ticket).await {
                failures += 1;
                warn!(
                    "[{}] Failed to dispatch round {} ticket to {}: {}",
                    room.tag(),
                    round,
                    user_id,
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_dispatch_failure();
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_tickets_issued(priority, groups.len(), tickets.len());
            if let Some(timer) = timer {
                metrics.record_matchmaking(timer.stop());
            }
        }

        if failures > 0 {
            warn!(
                "[{}] {} of {} join dispatches failed",
                room.tag(),
                failures,
                tickets.len()
            );
        }

        Ok(tickets)
    }

    /// Ticket issued to `user_id` for `round`, if any
    pub async fn user_ticket(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        round: u32,
        user_id: &str,
    ) -> Result<Option<GameTicket>> {
        let raw = self
            .store
            .hash_get(&keys::user_tickets(contest_id, time_slot, round), user_id)
            .await?;
        raw.map(|raw| decode_ticket(&raw)).transpose()
    }

    /// All tickets issued for `round`, keyed by user
    pub async fn round_tickets(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        round: u32,
    ) -> Result<HashMap<UserId, GameTicket>> {
        let fields = self
            .store
            .hash_get_all(&keys::user_tickets(contest_id, time_slot, round))
            .await?;

        fields
            .into_iter()
            .map(|(user_id, raw)| Ok((user_id, decode_ticket(&raw)?)))
            .collect()
    }

    /// Append unassigned tickets to the round's FIFO queue
    pub async fn push_queued_tickets(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        round: u32,
        tickets: &[GameTicket],
    ) -> Result<usize> {
        if tickets.is_empty() {
            return Ok(0);
        }

        let values = tickets
            .iter()
            .map(encode_ticket)
            .collect::<Result<Vec<String>>>()?;

        let key = keys::ticket_queue(contest_id, time_slot, round);
        let length = self.store.list_push(&key, &values).await?;
        self.store.expire(&key, self.settings.ticket_ttl).await?;
        debug!(
            "Queued {} tickets for {}-{} round {} (queue length {})",
            tickets.len(),
            contest_id,
            time_slot,
            round,
            length
        );
        Ok(length)
    }

    /// Take the oldest queued ticket
    pub async fn pop_queued_ticket(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        round: u32,
    ) -> Result<Option<GameTicket>> {
        let raw = self
            .store
            .list_pop(&keys::ticket_queue(contest_id, time_slot, round))
            .await?;
        raw.map(|raw| decode_ticket(&raw)).transpose()
    }

    /// Walk the preferred tier, consulting the opponent lookup only for the
    /// player heading each new group
    async fn preferred_tier_groups(
        &self,
        players: &[UserId],
        room: &RoomRecord,
        contest: &ContestDefinition,
    ) -> Vec<PlayerGroup> {
        let mut groups = Vec::new();
        let mut index = 0;

        while index < players.len() {
            let opponent = self.lookup_opponent(&players[index], room, contest).await;
            let group = preferred_group_at(players, index, room.capacity, opponent);
            index += group.players.len();
            groups.push(group);
        }

        groups
    }

    async fn lookup_opponent(
        &self,
        user_id: &str,
        room: &RoomRecord,
        contest: &ContestDefinition,
    ) -> Option<OpponentLink> {
        if !contest.allows_preferred_opponent {
            return None;
        }

        match self
            .users
            .preferred_opponent(user_id, contest, room.time_slot())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!(
                    "[{}] Preferred opponent lookup failed for {}: {}",
                    room.tag(),
                    user_id,
                    e
                );
                None
            }
        }
    }

    fn tickets_for_group(
        &self,
        group: &PlayerGroup,
        priority: GamePriority,
        room: &RoomRecord,
        round: u32,
        next_round_at_ms: i64,
    ) -> Vec<(UserId, GameTicket)> {
        let game_id = generate_game_id();
        let server_address = self.placement.next_server();

        group
            .players
            .iter()
            .enumerate()
            .map(|(seat, user_id)| {
                let metadata = match &group.opponent {
                    Some(opponent) => TicketMetadata::PreferredOpponentAssignment {
                        next_round_at_ms,
                        opponent: opponent.clone(),
                        opponent_seat: seat as u32 + 1,
                    },
                    None => TicketMetadata::PlainAssignment {
                        priority,
                        next_round_at_ms,
                    },
                };

                let ticket = GameTicket {
                    game_id,
                    capacity: group.width,
                    server_address: server_address.clone(),
                    player_pos: seat as u32,
                    contest_id: room.contest_id.clone(),
                    time_slot: room.time_slot(),
                    game_server_timeout_ms: self.settings.game_server_timeout_ms,
                    game_play_time_ms: room.round_duration_ms,
                    round,
                    metadata,
                };
                (user_id.clone(), ticket)
            })
            .collect()
    }

    async fn persist_tickets(
        &self,
        room: &RoomRecord,
        round: u32,
        tickets: &[(UserId, GameTicket)],
    ) -> Result<()> {
        let fields = tickets
            .iter()
            .map(|(user_id, ticket)| Ok((user_id.clone(), encode_ticket(ticket)?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        let key = keys::user_tickets(&room.contest_id, room.time_slot(), round);
        self.store.hash_set(&key, &fields).await?;
        self.store.expire(&key, self.settings.ticket_ttl).await
    }
}

fn encode_ticket(ticket: &GameTicket) -> Result<String> {
    serde_json::to_string(ticket).map_err(|e| {
        ContestError::InternalError {
            message: format!("Failed to serialize ticket: {}", e),
        }
        .into()
    })
}

fn decode_ticket(raw: &str) -> Result<GameTicket> {
    serde_json::from_str(raw).map_err(|e| {
        ContestError::StoreError {
            message: format!("Malformed ticket: {}", e),
        }
        .into()
    })
}
