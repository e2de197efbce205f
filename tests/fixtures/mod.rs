//! Test fixtures and recording collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use mega_contest::amqp::publisher::MockEventPublisher;
use mega_contest::broadcast::JoinCounterBroadcaster;
use mega_contest::collaborators::{TransactionService, UserService};
use mega_contest::contest::{ContestCatalog, RoomRegistry};
use mega_contest::error::Result;
use mega_contest::facade::{ContestOrchestrator, OrchestratorDeps, OrchestratorSettings};
use mega_contest::matchmaking::{MatchmakingEngine, MatchmakingSettings, RoundRobinPlacement};
use mega_contest::metrics::MetricsCollector;
use mega_contest::scheduler::{DeadlineIndex, RoundScheduler, SchedulerSettings};
use mega_contest::store::{InMemoryStore, StaticPrizeBreakupSource, StoreGateway};
use mega_contest::types::{ContestDefinition, GameTicket, OpponentLink, TimeSlot, User};
use mega_contest::utils::now_millis;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// User service that keeps everything in memory and records every join
#[derive(Default)]
pub struct RecordingUsers {
    testers: Mutex<HashSet<String>>,
    blocked: Mutex<HashSet<String>>,
    active: Mutex<HashSet<(String, TimeSlot, String)>>,
    running: Mutex<HashMap<String, GameTicket>>,
    opponents: Mutex<HashMap<String, OpponentLink>>,
    joins: Mutex<Vec<(String, GameTicket)>>,
}

impl RecordingUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tester(&self, user_id: &str) {
        self.testers.lock().unwrap().insert(user_id.to_string());
    }

    pub fn block(&self, user_id: &str) {
        self.blocked.lock().unwrap().insert(user_id.to_string());
    }

    pub fn link_opponent(&self, user_id: &str, opponent_id: &str) {
        self.opponents.lock().unwrap().insert(
            user_id.to_string(),
            OpponentLink {
                opponent_id: opponent_id.to_string(),
                level: 1,
                opponent_mid: None,
                log_id: Some(format!("log-{}", user_id)),
            },
        );
    }

    /// Every ticket handed to the game-assignment service, in order
    pub fn joins(&self) -> Vec<(String, GameTicket)> {
        self.joins.lock().unwrap().clone()
    }

    pub fn joins_for_round(&self, round: u32) -> Vec<(String, GameTicket)> {
        self.joins()
            .into_iter()
            .filter(|(_, ticket)| ticket.round == round)
            .collect()
    }
}

#[async_trait]
impl UserService for RecordingUsers {
    async fn is_tester(&self, user: &User) -> Result<bool> {
        Ok(self.testers.lock().unwrap().contains(&user.id))
    }

    async fn is_blocked(&self, user_id: &str) -> Result<bool> {
        Ok(self.blocked.lock().unwrap().contains(user_id))
    }

    async fn is_active_user(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        Ok(self.active.lock().unwrap().contains(&(
            contest_id.to_string(),
            time_slot,
            user_id.to_string(),
        )))
    }

    async fn running_contest(&self, user_id: &str) -> Result<Option<GameTicket>> {
        Ok(self.running.lock().unwrap().get(user_id).cloned())
    }

    async fn mark_active_user(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        Ok(self.active.lock().unwrap().insert((
            contest_id.to_string(),
            time_slot,
            user_id.to_string(),
        )))
    }

    async fn save_assigned_ticket(&self, user_id: &str, ticket: &GameTicket) -> Result<()> {
        self.running
            .lock()
            .unwrap()
            .insert(user_id.to_string(), ticket.clone());
        Ok(())
    }

    async fn preferred_opponent(
        &self,
        user_id: &str,
        _contest: &ContestDefinition,
        _time_slot: TimeSlot,
    ) -> Result<Option<OpponentLink>> {
        Ok(self.opponents.lock().unwrap().get(user_id).cloned())
    }

    async fn join_game(&self, user_id: &str, ticket: &GameTicket) -> Result<()> {
        self.joins
            .lock()
            .unwrap()
            .push((user_id.to_string(), ticket.clone()));
        Ok(())
    }
}

/// Wallet with per-user balances that records every charge
#[derive(Default)]
pub struct RecordingWallet {
    balances: Mutex<HashMap<String, f64>>,
    charges: Mutex<Vec<(String, String)>>,
}

impl RecordingWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, user_id: &str, amount: f64) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default() += amount;
    }

    pub fn balance(&self, user_id: &str) -> f64 {
        self.balances
            .lock()
            .unwrap()
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    /// (user, contest) pairs charged so far
    pub fn charges(&self) -> Vec<(String, String)> {
        self.charges.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionService for RecordingWallet {
    async fn deduct_entry_fee(
        &self,
        user: &User,
        contest: &ContestDefinition,
        _time_slot: TimeSlot,
    ) -> Result<bool> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user.id.clone()).or_default();
        if *balance < contest.entry_fee {
            return Ok(false);
        }
        *balance -= contest.entry_fee;
        self.charges
            .lock()
            .unwrap()
            .push((user.id.clone(), contest.id.clone()));
        Ok(true)
    }
}

/// One process worth of wired components over a (possibly shared) store
pub struct TestSystem {
    pub store: Arc<InMemoryStore>,
    pub publisher: Arc<MockEventPublisher>,
    pub catalog: Arc<ContestCatalog>,
    pub registry: Arc<RoomRegistry>,
    pub scheduler: Arc<RoundScheduler>,
    pub orchestrator: Arc<ContestOrchestrator>,
    pub broadcaster: Arc<JoinCounterBroadcaster>,
    pub users: Arc<RecordingUsers>,
    pub wallet: Arc<RecordingWallet>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::on_store(Arc::new(InMemoryStore::new()))
    }

    /// Build a system on `store`; several systems on one store behave like
    /// several processes serving the same contests
    pub fn on_store(store: Arc<InMemoryStore>) -> Self {
        let shared: Arc<dyn StoreGateway> = store.clone();
        let publisher = Arc::new(MockEventPublisher::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let users = Arc::new(RecordingUsers::new());
        let wallet = Arc::new(RecordingWallet::new());

        let catalog = Arc::new(ContestCatalog::new(shared.clone(), Duration::ZERO));
        let registry = Arc::new(RoomRegistry::new(shared.clone(), Duration::from_secs(3600)));
        let placement = Arc::new(
            RoundRobinPlacement::new(vec![
                "10.0.0.1:7000".to_string(),
                "10.0.0.2:7000".to_string(),
            ])
            .unwrap(),
        );
        let engine = Arc::new(
            MatchmakingEngine::new(
                shared.clone(),
                users.clone(),
                placement.clone(),
                MatchmakingSettings::default(),
            )
            .with_metrics(metrics.clone()),
        );
        let scheduler = Arc::new(
            RoundScheduler::new(
                registry.clone(),
                catalog.clone(),
                engine.clone(),
                publisher.clone(),
                DeadlineIndex::new(shared.clone(), Duration::from_secs(600)),
                SchedulerSettings::default(),
            )
            .with_metrics(metrics.clone()),
        );
        let orchestrator = Arc::new(
            ContestOrchestrator::new(
                OrchestratorDeps {
                    store: shared,
                    catalog: catalog.clone(),
                    registry: registry.clone(),
                    scheduler: scheduler.clone(),
                    engine,
                    placement,
                    users: users.clone(),
                    transactions: wallet.clone(),
                    prize_source: Arc::new(StaticPrizeBreakupSource::new()),
                },
                OrchestratorSettings::default(),
            )
            .with_metrics(metrics.clone()),
        );
        let broadcaster = Arc::new(
            JoinCounterBroadcaster::new(catalog.clone(), publisher.clone(), Duration::from_secs(2))
                .with_metrics(metrics.clone()),
        );

        Self {
            store,
            publisher,
            catalog,
            registry,
            scheduler,
            orchestrator,
            broadcaster,
            users,
            wallet,
            metrics,
        }
    }

    /// Fund and subscribe `count` players named p0, p1, ...
    pub async fn subscribe_players(&self, contest_id: &str, count: usize) -> Vec<User> {
        let mut users = Vec::with_capacity(count);
        for i in 0..count {
            let user = User::new(format!("p{}", i));
            self.wallet.fund(&user.id, 100.0);
            self.orchestrator
                .subscribe(contest_id, &user)
                .await
                .unwrap_or_else(|e| panic!("subscribe {} failed: {:#}", user.id, e));
            users.push(user);
        }
        users
    }
}

/// Contest whose joining opened a minute ago and whose game starts
/// roughly `starts_in` from now
pub fn contest_json(
    contest_id: &str,
    starts_in: Duration,
    max_users: u32,
    rounds: u32,
) -> serde_json::Value {
    let start_secs = now_millis() / 1000 - 60;
    serde_json::json!({
        "cid": contest_id,
        "cn": format!("Mega {}", contest_id),
        "contestStart": start_secs * 1000,
        "WaitingTime": 60_000 + starts_in.as_millis() as i64,
        "tt": 2,
        "MaxUsers": max_users,
        "NoOfRound": rounds,
        "Duration": 60,
        "jf": 10.0
    })
}

pub async fn seed_contest(system: &TestSystem, contest: serde_json::Value) -> ContestDefinition {
    let contest: ContestDefinition = serde_json::from_value(contest).unwrap();
    let contest_id = contest.id.clone();
    system.catalog.store_catalog(&[contest]).await.unwrap();
    system
        .catalog
        .contest_by_id(&contest_id)
        .await
        .unwrap()
        .unwrap()
}
