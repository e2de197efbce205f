//! Contest orchestration: the operations clients call

use crate::collaborators::{TransactionService, UserService};
use crate::contest::{ContestCatalog, RoomCreation, RoomRecord, RoomRegistry, RoomState};
use crate::error::{ContestError, Result};
use crate::facade::responses::{ContestListResponse, PrizeBreakupResponse, RoomView};
use crate::matchmaking::{MatchmakingEngine, ServerPlacement};
use crate::metrics::MetricsCollector;
use crate::scheduler::RoundScheduler;
use crate::store::{keys, PrizeBreakupEntry, PrizeBreakupSource, StoreGateway};
use crate::types::{ContestDefinition, GameTicket, TimeSlot, User};
use crate::utils::now_millis;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tunables for client operations
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// When false only testers may subscribe
    pub joining_enabled: bool,
    pub inter_round_buffer_ms: i64,
    /// Lifetime of cached prize breakups
    pub prize_cache_ttl: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            joining_enabled: true,
            inter_round_buffer_ms: 30_000,
            prize_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Services the orchestrator is built from
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn StoreGateway>,
    pub catalog: Arc<ContestCatalog>,
    pub registry: Arc<RoomRegistry>,
    pub scheduler: Arc<RoundScheduler>,
    pub engine: Arc<MatchmakingEngine>,
    pub placement: Arc<dyn ServerPlacement>,
    pub users: Arc<dyn UserService>,
    pub transactions: Arc<dyn TransactionService>,
    pub prize_source: Arc<dyn PrizeBreakupSource>,
}

pub struct ContestOrchestrator {
    deps: OrchestratorDeps,
    joining_enabled: AtomicBool,
    settings: OrchestratorSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ContestOrchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        Self {
            joining_enabled: AtomicBool::new(settings.joining_enabled),
            deps,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn joining_enabled(&self) -> bool {
        self.joining_enabled.load(Ordering::Relaxed)
    }

    /// Maintenance switch for new subscriptions
    pub fn set_joining_enabled(&self, enabled: bool) {
        self.joining_enabled.store(enabled, Ordering::Relaxed);
        info!("Contest joining {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Join `user` to the current room of a contest, creating the room on
    /// first join
    pub async fn subscribe(&self, contest_id: &str, user: &User) -> Result<RoomView> {
        let started = Instant::now();
        let result = self.try_subscribe(contest_id, user).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_join(outcome_label(&result));
            metrics.record_operation("subscribe", started.elapsed());
        }
        result
    }

    /// Hand `user` their ticket for the room's current round.
    ///
    /// Repeating the call within a round returns the same ticket.
    pub async fn mark_presence(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user: &User,
    ) -> Result<GameTicket> {
        let started = Instant::now();
        let result = self.try_mark_presence(contest_id, time_slot, user).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_presence(outcome_label(&result));
            metrics.record_operation("presence", started.elapsed());
        }
        result
    }

    pub async fn contest_list(&self, user_id: &str) -> Result<ContestListResponse> {
        let started = Instant::now();
        let match_contests = self.deps.catalog.contest_list().await?;
        debug!("Contest list for {}: {} contests", user_id, match_contests.len());

        if let Some(metrics) = &self.metrics {
            metrics.record_operation("contest_list", started.elapsed());
        }
        Ok(ContestListResponse { match_contests })
    }

    /// Prize breakup of a contest: cache first, relational source second.
    /// An unknown contest yields an empty breakup.
    pub async fn prize_breakup(&self, contest_id: &str) -> Result<PrizeBreakupResponse> {
        let Some(contest) = self.deps.catalog.contest_by_id(contest_id).await? else {
            return Ok(PrizeBreakupResponse {
                contest: None,
                breakup: Vec::new(),
            });
        };

        let breakup = self.load_prize_breakup(contest_id).await?;
        Ok(PrizeBreakupResponse {
            contest: Some(contest),
            breakup,
        })
    }

    async fn try_subscribe(&self, contest_id: &str, user: &User) -> Result<RoomView> {
        let now_ms = now_millis();

        if !self.joining_enabled() && !self.deps.users.is_tester(user).await? {
            return Err(ContestError::ServerMaintenance.into());
        }
        if self.deps.users.is_blocked(&user.id).await? {
            return Err(ContestError::UserBlocked {
                user_id: user.id.clone(),
            }
            .into());
        }

        let contest = match self.deps.catalog.contest_by_id(contest_id).await? {
            Some(contest) if contest.has_started(now_ms) => contest,
            _ => {
                return Err(ContestError::ContestNotAvailable {
                    contest_id: contest_id.to_string(),
                }
                .into())
            }
        };

        let room = self.find_or_create_room(&contest, now_ms).await?;
        let time_slot = room.time_slot();
        if room.state != RoomState::AcceptJoining {
            return Err(ContestError::InvalidRoomState {
                room_id: room.room_id.clone(),
                state: room.state.to_string(),
            }
            .into());
        }

        let already_joined = || -> anyhow::Error {
            ContestError::AlreadyJoined {
                contest_id: contest_id.to_string(),
                user_id: user.id.clone(),
            }
            .into()
        };
        if self
            .deps
            .registry
            .has_joined_player(contest_id, time_slot, &user.id)
            .await?
        {
            return Err(already_joined());
        }
        if !self
            .deps
            .registry
            .add_joined_player(contest_id, time_slot, &user.id)
            .await?
        {
            return Err(already_joined());
        }
        info!("[{}] {} subscribing", room.tag(), user.id);

        let charged = self
            .deps
            .transactions
            .deduct_entry_fee(user, &contest, time_slot)
            .await;
        match charged {
            Ok(true) => {}
            Ok(false) => {
                self.undo_join(&room, &user.id).await;
                return Err(ContestError::InsufficientBalance {
                    user_id: user.id.clone(),
                }
                .into());
            }
            Err(e) => {
                self.undo_join(&room, &user.id).await;
                return Err(e);
            }
        }

        match self.deps.catalog.increment_join_counter(contest_id).await {
            Ok(total) => debug!("[{}] Join counter now {}", room.tag(), total),
            Err(e) => warn!("[{}] Failed to bump join counter: {}", room.tag(), e),
        }

        info!("[{}] {} joined", room.tag(), user.id);
        Ok(RoomView {
            room,
            server_address: self.deps.placement.current_server(),
        })
    }

    async fn find_or_create_room(
        &self,
        contest: &ContestDefinition,
        now_ms: i64,
    ) -> Result<RoomRecord> {
        if let Some(room) = self
            .deps
            .registry
            .find_room(&contest.id, contest.game_start_ms)
            .await?
        {
            return Ok(room);
        }

        let record = RoomRecord::for_contest(contest, self.settings.inter_round_buffer_ms);
        match self.deps.registry.create_room(record, now_ms).await? {
            RoomCreation::Created(room) => {
                self.deps.scheduler.schedule_pre_start(&room, now_ms).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_room_created();
                }
                Ok(room)
            }
            RoomCreation::Existing(room) => Ok(room),
        }
    }

    async fn undo_join(&self, room: &RoomRecord, user_id: &str) {
        if let Err(e) = self
            .deps
            .registry
            .remove_joined_player(&room.contest_id, room.time_slot(), user_id)
            .await
        {
            warn!("[{}] Failed to undo join of {}: {}", room.tag(), user_id, e);
        }
    }

    async fn try_mark_presence(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user: &User,
    ) -> Result<GameTicket> {
        let Some(room) = self.deps.registry.find_room(contest_id, time_slot).await? else {
            return Err(ContestError::RoomNotFound {
                contest_id: contest_id.to_string(),
                time_slot,
            }
            .into());
        };

        if self
            .deps
            .users
            .is_active_user(contest_id, time_slot, &user.id)
            .await?
        {
            if let Some(ticket) = self.deps.users.running_contest(&user.id).await? {
                if ticket.contest_id == contest_id
                    && ticket.time_slot == time_slot
                    && ticket.round == room.current_round
                {
                    debug!("[{}] Presence already marked by {}", room.tag(), user.id);
                    return Ok(ticket);
                }
            }
        }

        match room.state {
            RoomState::AcceptJoining => {
                return Err(ContestError::EarlyPresence {
                    contest_id: contest_id.to_string(),
                    time_slot,
                }
                .into())
            }
            RoomState::Cancelled => {
                return Err(ContestError::TournamentCancelled {
                    contest_id: contest_id.to_string(),
                    time_slot,
                }
                .into())
            }
            RoomState::Completed => {
                return Err(ContestError::TournamentCompleted {
                    contest_id: contest_id.to_string(),
                    time_slot,
                }
                .into())
            }
            RoomState::PreStartingConfig | RoomState::GameStart => {}
        }

        let round = room.current_round;
        let ticket = match self
            .deps
            .engine
            .user_ticket(contest_id, time_slot, round, &user.id)
            .await?
        {
            Some(ticket) => ticket,
            None => self
                .deps
                .engine
                .pop_queued_ticket(contest_id, time_slot, round)
                .await?
                .ok_or_else(|| ContestError::TicketUnavailable {
                    user_id: user.id.clone(),
                })?,
        };

        self.deps
            .users
            .mark_active_user(contest_id, time_slot, &user.id)
            .await?;
        self.deps
            .users
            .save_assigned_ticket(&user.id, &ticket)
            .await?;

        info!(
            "[{}] {} present for round {} (game {}, seat {})",
            room.tag(),
            user.id,
            round,
            ticket.game_id,
            ticket.player_pos
        );
        Ok(ticket)
    }

    async fn load_prize_breakup(&self, contest_id: &str) -> Result<Vec<PrizeBreakupEntry>> {
        let cache_key = keys::prize_breakup(contest_id);
        if let Some(raw) = self.deps.store.get(&cache_key).await? {
            match serde_json::from_str::<Vec<PrizeBreakupEntry>>(&raw) {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => {}
                Err(e) => warn!("Ignoring malformed cached breakup for {}: {}", contest_id, e),
            }
        }

        let rows = self
            .deps
            .prize_source
            .prize_breakup(contest_id)
            .await?
            .ok_or_else(|| ContestError::NoPrizeBreakup {
                contest_id: contest_id.to_string(),
            })?;

        match serde_json::to_string(&rows) {
            Ok(payload) => {
                if let Err(e) = self
                    .deps
                    .store
                    .set(&cache_key, &payload, Some(self.settings.prize_cache_ttl))
                    .await
                {
                    warn!("Failed to cache prize breakup for {}: {}", contest_id, e);
                }
            }
            Err(e) => warn!("Failed to encode prize breakup for {}: {}", contest_id, e),
        }
        Ok(rows)
    }
}

/// Metric label for an operation outcome
fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.downcast_ref::<ContestError>() {
            Some(contest_error) if contest_error.is_client_error() => "rejected",
            _ => "error",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::collaborators::{StoreUserService, StoreWalletService};
    use crate::matchmaking::{MatchmakingSettings, RoundRobinPlacement};
    use crate::scheduler::{DeadlineIndex, SchedulerSettings};
    use crate::store::{InMemoryStore, StaticPrizeBreakupSource};
    use crate::types::{GamePriority, TicketMetadata};

    struct Harness {
        orchestrator: ContestOrchestrator,
        engine: Arc<MatchmakingEngine>,
        placement: Arc<dyn ServerPlacement>,
        registry: Arc<RoomRegistry>,
        scheduler: Arc<RoundScheduler>,
        wallet: Arc<StoreWalletService>,
        catalog: Arc<ContestCatalog>,
    }

    fn harness(joining_enabled: bool) -> Harness {
        let store: Arc<dyn StoreGateway> = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(MockEventPublisher::new());
        let placement: Arc<dyn ServerPlacement> = Arc::new(
            RoundRobinPlacement::new(vec!["gs-1".to_string(), "gs-2".to_string()]).unwrap(),
        );
        let catalog = Arc::new(ContestCatalog::new(store.clone(), Duration::ZERO));
        let registry = Arc::new(RoomRegistry::new(store.clone(), Duration::from_secs(3600)));
        let users = Arc::new(StoreUserService::new(
            store.clone(),
            publisher.clone(),
            vec!["tester".to_string()],
            Duration::from_secs(3600),
        ));
        let wallet = Arc::new(StoreWalletService::new(store.clone()));
        let engine = Arc::new(MatchmakingEngine::new(
            store.clone(),
            users.clone(),
            placement.clone(),
            MatchmakingSettings::default(),
        ));
        let scheduler = Arc::new(RoundScheduler::new(
            registry.clone(),
            catalog.clone(),
            engine.clone(),
            publisher,
            DeadlineIndex::new(store.clone(), Duration::from_secs(600)),
            SchedulerSettings::default(),
        ));
        let prize_source = Arc::new(StaticPrizeBreakupSource::new().with_breakup(
            "c1",
            vec![PrizeBreakupEntry {
                rank_from: 1,
                rank_to: 1,
                amount: 500.0,
            }],
        ));

        let orchestrator = ContestOrchestrator::new(
            OrchestratorDeps {
                store,
                catalog: catalog.clone(),
                registry: registry.clone(),
                scheduler: scheduler.clone(),
                engine: engine.clone(),
                placement: placement.clone(),
                users,
                transactions: wallet.clone(),
                prize_source,
            },
            OrchestratorSettings {
                joining_enabled,
                ..Default::default()
            },
        );

        Harness {
            orchestrator,
            engine,
            placement,
            registry,
            scheduler,
            wallet,
            catalog,
        }
    }

    /// Contest that opened a minute ago and starts its game in an hour
    async fn seed_contest(h: &Harness, fee: f64) -> ContestDefinition {
        let start_secs = now_millis() / 1000 - 60;
        let contest: ContestDefinition = serde_json::from_value(serde_json::json!({
            "cid": "c1",
            "contestStart": start_secs * 1000,
            "WaitingTime": 3_660_000,
            "tt": 2,
            "MaxUsers": 100,
            "Duration": 60,
            "jf": fee
        }))
        .unwrap();
        h.catalog.store_catalog(&[contest]).await.unwrap();
        h.catalog.contest_by_id("c1").await.unwrap().unwrap()
    }

    fn error_of<T: std::fmt::Debug>(result: Result<T>) -> ContestError {
        result
            .unwrap_err()
            .downcast::<ContestError>()
            .expect("typed error")
    }

    #[tokio::test]
    async fn test_first_subscribe_creates_room_and_arms_pre_start() {
        let h = harness(true);
        let contest = seed_contest(&h, 0.0).await;

        let view = h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();
        assert_eq!(view.server_address, "gs-1");
        assert_eq!(view.room.game_start_ms, contest.game_start_ms);
        assert!(h
            .registry
            .has_joined_player("c1", contest.game_start_ms, "u1")
            .await
            .unwrap());
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(h.catalog.join_counters().await.unwrap().get("c1"), Some(&1));

        h.orchestrator.subscribe("c1", &User::new("u2")).await.unwrap();
        assert_eq!(h.scheduler.armed_count(), 1);
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_room_view_leaves_game_placement_alone() {
        let h = harness(true);
        seed_contest(&h, 0.0).await;

        for user in ["u1", "u2", "u3"] {
            let view = h.orchestrator.subscribe("c1", &User::new(user)).await.unwrap();
            assert_eq!(view.server_address, "gs-1");
        }
        assert_eq!(h.placement.next_server(), "gs-1");
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_presence_falls_back_to_queued_ticket() {
        let h = harness(true);
        let contest = seed_contest(&h, 0.0).await;
        let slot = contest.game_start_ms;
        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();

        let room = h.registry.find_room("c1", slot).await.unwrap().unwrap();
        h.registry
            .transition(&room, RoomState::PreStartingConfig)
            .await
            .unwrap();

        let queued = GameTicket {
            game_id: uuid::Uuid::new_v4(),
            capacity: 2,
            server_address: "gs-2".to_string(),
            player_pos: 1,
            contest_id: "c1".to_string(),
            time_slot: slot,
            game_server_timeout_ms: 1000,
            game_play_time_ms: 60_000,
            round: 1,
            metadata: TicketMetadata::PlainAssignment {
                priority: GamePriority::Plain,
                next_round_at_ms: slot + 90_000,
            },
        };
        h.engine
            .push_queued_tickets("c1", slot, 1, std::slice::from_ref(&queued))
            .await
            .unwrap();

        let ticket = h
            .orchestrator
            .mark_presence("c1", slot, &User::new("u1"))
            .await
            .unwrap();
        assert_eq!(ticket, queued);
        assert!(h
            .engine
            .pop_queued_ticket("c1", slot, 1)
            .await
            .unwrap()
            .is_none());

        // Repeat presence returns the saved assignment, not another queue pop
        let again = h
            .orchestrator
            .mark_presence("c1", slot, &User::new("u1"))
            .await
            .unwrap();
        assert_eq!(again, queued);

        let err = error_of(
            h.orchestrator
                .mark_presence("c1", slot, &User::new("u2"))
                .await,
        );
        assert!(matches!(err, ContestError::TicketUnavailable { .. }));
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_double_subscribe_rejected() {
        let h = harness(true);
        seed_contest(&h, 0.0).await;

        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();
        let err = error_of(h.orchestrator.subscribe("c1", &User::new("u1")).await);
        assert!(matches!(err, ContestError::AlreadyJoined { .. }));
        assert_eq!(h.catalog.join_counters().await.unwrap().get("c1"), Some(&1));
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_unpaid_join_is_rolled_back() {
        let h = harness(true);
        let contest = seed_contest(&h, 10.0).await;

        let err = error_of(h.orchestrator.subscribe("c1", &User::new("u1")).await);
        assert!(matches!(err, ContestError::InsufficientBalance { .. }));
        assert!(!h
            .registry
            .has_joined_player("c1", contest.game_start_ms, "u1")
            .await
            .unwrap());

        h.wallet.credit("u1", 1000).await.unwrap();
        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();
        assert_eq!(h.wallet.balance("u1").await.unwrap(), 0);
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_joining_disabled_admits_testers_only() {
        let h = harness(false);
        seed_contest(&h, 0.0).await;

        let err = error_of(h.orchestrator.subscribe("c1", &User::new("u1")).await);
        assert_eq!(err, ContestError::ServerMaintenance);
        h.orchestrator
            .subscribe("c1", &User::new("tester"))
            .await
            .unwrap();

        h.orchestrator.set_joining_enabled(true);
        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_contest_not_available() {
        let h = harness(true);
        let err = error_of(h.orchestrator.subscribe("nope", &User::new("u1")).await);
        assert!(matches!(err, ContestError::ContestNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_presence_before_start_is_early() {
        let h = harness(true);
        let contest = seed_contest(&h, 0.0).await;
        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();

        let err = error_of(
            h.orchestrator
                .mark_presence("c1", contest.game_start_ms, &User::new("u1"))
                .await,
        );
        assert!(matches!(err, ContestError::EarlyPresence { .. }));

        let err = error_of(
            h.orchestrator
                .mark_presence("c1", 42, &User::new("u1"))
                .await,
        );
        assert!(matches!(err, ContestError::RoomNotFound { .. }));
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_prize_breakup_cache_and_fallbacks() {
        let h = harness(true);
        seed_contest(&h, 0.0).await;

        let response = h.orchestrator.prize_breakup("c1").await.unwrap();
        assert!(response.contest.is_some());
        assert_eq!(response.breakup.len(), 1);

        let cached = h
            .orchestrator
            .deps
            .store
            .get(&keys::prize_breakup("c1"))
            .await
            .unwrap();
        assert!(cached.is_some());

        let missing = h.orchestrator.prize_breakup("zzz").await.unwrap();
        assert!(missing.contest.is_none());
        assert!(missing.breakup.is_empty());
    }

    #[tokio::test]
    async fn test_contest_list_carries_join_totals() {
        let h = harness(true);
        seed_contest(&h, 0.0).await;
        h.orchestrator.subscribe("c1", &User::new("u1")).await.unwrap();

        let list = h.orchestrator.contest_list("u1").await.unwrap();
        assert_eq!(list.match_contests.len(), 1);
        assert_eq!(list.match_contests[0].total_joined, 1);
        h.scheduler.shutdown();
    }
}
