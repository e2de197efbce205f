//! Room timer chain: pre-start, then one timer per round boundary

use crate::amqp::publisher::EventPublisher;
use crate::contest::{ContestCatalog, RoomRecord, RoomRegistry, RoomState, RoomUpdate};
use crate::error::{ContestError, Result};
use crate::matchmaking::{split_for_pre_start, MatchmakingEngine};
use crate::metrics::MetricsCollector;
use crate::scheduler::deadlines::{DeadlineIndex, ScheduledTransition, TransitionPhase};
use crate::scheduler::timer::TaskTimers;
use crate::types::{ContestDefinition, GamePriority, RoomStateChanged, TimeSlot};
use crate::utils::{current_timestamp, fill_ratio, now_millis};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Policy for the timer chain
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Rooms filled below this ratio at pre-start are cancelled
    pub cancel_fill_threshold: f64,
    pub inter_round_buffer_ms: i64,
    /// Retries after the first failed attempt of a transition
    pub max_retries: u32,
    /// First retry delay; doubles on each further retry
    pub retry_base_delay: Duration,
    /// How long a firing claim is held
    pub claim_ttl: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cancel_fill_threshold: 0.5,
            inter_round_buffer_ms: 30_000,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            claim_ttl: Duration::from_secs(600),
        }
    }
}

/// Drives rooms through their lifecycle on deferred timers
pub struct RoundScheduler {
    registry: Arc<RoomRegistry>,
    catalog: Arc<ContestCatalog>,
    engine: Arc<MatchmakingEngine>,
    publisher: Arc<dyn EventPublisher>,
    deadlines: DeadlineIndex,
    timers: TaskTimers,
    metrics: Option<Arc<MetricsCollector>>,
    settings: SchedulerSettings,
}

impl RoundScheduler {
    pub fn new(
        registry: Arc<RoomRegistry>,
        catalog: Arc<ContestCatalog>,
        engine: Arc<MatchmakingEngine>,
        publisher: Arc<dyn EventPublisher>,
        deadlines: DeadlineIndex,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            catalog,
            engine,
            publisher,
            deadlines,
            timers: TaskTimers::new(),
            metrics: None,
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn deadlines(&self) -> &DeadlineIndex {
        &self.deadlines
    }

    /// Timers currently armed in this process
    pub fn armed_count(&self) -> usize {
        self.timers.armed_count()
    }

    /// Arm the pre-start timer of a freshly created room.
    ///
    /// Fails when the game start is not in the future.
    pub async fn schedule_pre_start(self: &Arc<Self>, room: &RoomRecord, now_ms: i64) -> Result<()> {
        let delay_ms = room.game_start_ms - now_ms;
        if delay_ms <= 0 {
            return Err(ContestError::SchedulingFailed {
                reason: format!("[{}] game start is {} ms in the past", room.tag(), -delay_ms),
            }
            .into());
        }

        let transition =
            ScheduledTransition::new(&room.contest_id, room.time_slot(), TransitionPhase::PreStart);
        self.deadlines.record(&transition, room.game_start_ms).await?;
        self.arm(transition, room.game_start_ms, now_ms)?;
        info!("[{}] Pre-start armed in {} ms", room.tag(), delay_ms);
        Ok(())
    }

    /// Re-arm every pending transition in the index; overdue ones fire now.
    pub async fn recover(self: &Arc<Self>, now_ms: i64) -> Result<usize> {
        let mut recovered = 0;
        for (transition, due_ms) in self.deadlines.pending().await? {
            if self.timers.is_armed(&transition.member()) {
                continue;
            }

            match self.arm(transition.clone(), due_ms, now_ms) {
                Ok(()) => {
                    recovered += 1;
                    debug!("{} recovered, due in {} ms", transition, due_ms - now_ms);
                }
                Err(e) => warn!("Failed to recover {}: {}", transition, e),
            }
        }

        if recovered > 0 {
            info!("Recovered {} pending room transitions", recovered);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_recovered(recovered);
        }
        Ok(recovered)
    }

    /// Abort every armed timer. Index entries are kept for recovery.
    pub fn shutdown(&self) -> usize {
        let aborted = self.timers.abort_all();
        if let Some(metrics) = &self.metrics {
            metrics.scheduler().armed_timers.set(0);
        }
        aborted
    }

    /// Close joining, then cancel the room or start round one
    pub async fn run_pre_start(self: &Arc<Self>, contest_id: &str, time_slot: TimeSlot) -> Result<()> {
        let Some(mut room) = self.registry.find_room(contest_id, time_slot).await? else {
            warn!("[{}-{}] Pre-start fired for a missing room", contest_id, time_slot);
            return Ok(());
        };

        match room.state {
            RoomState::AcceptJoining => {
                room = self.move_to(&room, RoomState::PreStartingConfig).await?;
            }
            RoomState::PreStartingConfig => {
                info!("[{}] Resuming interrupted pre-start", room.tag());
            }
            state => {
                debug!("[{}] Pre-start ignored in state {}", room.tag(), state);
                return Ok(());
            }
        }

        let joined = self.registry.joined_players(contest_id, time_slot).await?;
        let ratio = fill_ratio(joined.len(), room.max_users);
        if let Some(metrics) = &self.metrics {
            metrics.record_fill_ratio(ratio);
        }

        if ratio < self.settings.cancel_fill_threshold {
            info!(
                "[{}] Cancelling: {} of {} joined ({:.2} < {:.2})",
                room.tag(),
                joined.len(),
                room.max_users,
                ratio,
                self.settings.cancel_fill_threshold
            );
            self.move_to(&room, RoomState::Cancelled).await?;
            return Ok(());
        }

        let contest = self.contest_for(&room).await?;
        let (preferred, plain) = split_for_pre_start(&joined, room.max_users);
        self.engine
            .generate_tickets(GamePriority::PreferredOpponentFirst, preferred, &room, &contest, 1)
            .await?;
        self.engine
            .generate_tickets(GamePriority::Plain, plain, &room, &contest, 1)
            .await?;

        let next_round_ms = now_millis() + room.round_duration_ms + self.settings.inter_round_buffer_ms;
        let room = self
            .registry
            .update_room(
                &room,
                RoomUpdate {
                    next_round_ms: Some(next_round_ms),
                    ..Default::default()
                },
            )
            .await?;
        let room = self.move_to(&room, RoomState::GameStart).await?;

        self.arm_round_end(&room, 1, next_round_ms).await?;
        info!(
            "[{}] Round 1 started with {} players",
            room.tag(),
            joined.len()
        );
        Ok(())
    }

    /// End of `round`: complete the room or start the next round with the winners
    pub async fn run_next_round(
        self: &Arc<Self>,
        contest_id: &str,
        time_slot: TimeSlot,
        round: u32,
    ) -> Result<()> {
        let Some(room) = self.registry.find_room(contest_id, time_slot).await? else {
            warn!("[{}-{}] Round {} ended for a missing room", contest_id, time_slot, round);
            return Ok(());
        };

        if room.state != RoomState::GameStart {
            debug!(
                "[{}] Round {} end ignored in state {}",
                room.tag(),
                round,
                room.state
            );
            return Ok(());
        }
        if room.current_round != round {
            debug!(
                "[{}] Stale round {} end, room is on round {}",
                room.tag(),
                round,
                room.current_round
            );
            return Ok(());
        }

        if round >= room.no_of_rounds {
            self.move_to(&room, RoomState::Completed).await?;
            let dropped = self.deadlines.remove_room(contest_id, time_slot).await?;
            info!(
                "[{}] Tournament completed after {} rounds ({} schedule entries dropped)",
                room.tag(),
                round,
                dropped
            );
            return Ok(());
        }

        let next = round + 1;
        let winners = self
            .registry
            .round_winners(round, contest_id, time_slot)
            .await?;
        let contest = self.contest_for(&room).await?;
        self.engine
            .generate_tickets(GamePriority::Plain, &winners, &room, &contest, next)
            .await?;

        let next_round_ms = now_millis() + room.round_duration_ms + self.settings.inter_round_buffer_ms;
        room.state.transition(RoomState::GameStart)?;
        let updated = self
            .registry
            .update_room(
                &room,
                RoomUpdate {
                    current_round: Some(next),
                    next_round_ms: Some(next_round_ms),
                    ..Default::default()
                },
            )
            .await?;
        self.announce(&room, &updated).await;

        self.arm_round_end(&updated, next, next_round_ms).await?;
        info!(
            "[{}] Round {} started with {} winners of round {}",
            updated.tag(),
            next,
            winners.len(),
            round
        );
        Ok(())
    }

    async fn arm_round_end(self: &Arc<Self>, room: &RoomRecord, round: u32, due_ms: i64) -> Result<()> {
        let transition = ScheduledTransition::new(
            &room.contest_id,
            room.time_slot(),
            TransitionPhase::NextRound(round),
        );
        self.deadlines.record(&transition, due_ms).await?;
        self.arm(transition, due_ms, now_millis())
    }

    fn arm(self: &Arc<Self>, transition: ScheduledTransition, due_ms: i64, now_ms: i64) -> Result<()> {
        let delay = Duration::from_millis((due_ms - now_ms).max(0) as u64);
        let this = self.clone();
        let member = transition.member();
        self.timers.schedule(
            member,
            delay,
            Box::pin(async move { this.fire(transition).await }),
        )?;

        if let Some(metrics) = &self.metrics {
            metrics.record_timer_armed();
        }
        Ok(())
    }

    /// Timer callback: claim, run with bounded retries, then clear the entry
    async fn fire(self: Arc<Self>, transition: ScheduledTransition) {
        let phase = transition.phase.label();
        if let Some(metrics) = &self.metrics {
            metrics.record_timer_finished();
        }

        match self.deadlines.is_pending(&transition).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} already ran elsewhere", transition);
                return;
            }
            Err(e) => warn!("{} schedule entry could not be read: {}", transition, e),
        }

        match self.deadlines.claim(&transition).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} claimed elsewhere, checking again once the claim lapses", transition);
                self.retry_later(transition).await;
                return;
            }
            Err(e) => {
                error!("{} could not be claimed: {}", transition, e);
                self.retry_later(transition).await;
                return;
            }
        }

        let mut attempt = 0u32;
        loop {
            match self.execute(&transition).await {
                Ok(()) => {
                    if let Err(e) = self.deadlines.remove(&transition).await {
                        warn!("{} ran but its schedule entry remains: {}", transition, e);
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_transition_fired(phase);
                    }
                    return;
                }
                Err(e) if attempt < self.settings.max_retries => {
                    let delay = self.settings.retry_base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        "{} failed (attempt {}), retrying in {:?}: {}",
                        transition, attempt, delay, e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_transition_retry(phase);
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "{} stalled after {} attempts: {}",
                        transition,
                        attempt + 1,
                        e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_transition_stall(phase);
                    }
                    if let Err(e) = self.deadlines.release(&transition).await {
                        warn!("{} claim could not be released: {}", transition, e);
                    }
                    self.retry_later(transition).await;
                    return;
                }
            }
        }
    }

    /// Push a transition that could not run now one claim lifetime out, so
    /// it fires again after a crashed holder's claim expires
    async fn retry_later(self: &Arc<Self>, transition: ScheduledTransition) {
        if let Ok(false) = self.deadlines.is_pending(&transition).await {
            debug!("{} finished elsewhere, not re-arming", transition);
            return;
        }

        let now_ms = now_millis();
        let due_ms = now_ms + self.settings.claim_ttl.as_millis() as i64;
        if let Err(e) = self.deadlines.record(&transition, due_ms).await {
            warn!("{} could not be rescheduled in the index: {}", transition, e);
        }
        if let Err(e) = self.arm(transition.clone(), due_ms, now_ms) {
            error!("{} could not be re-armed: {}", transition, e);
        }
    }

    async fn execute(self: &Arc<Self>, transition: &ScheduledTransition) -> Result<()> {
        match transition.phase {
            TransitionPhase::PreStart => {
                self.run_pre_start(&transition.contest_id, transition.time_slot)
                    .await
            }
            TransitionPhase::NextRound(round) => {
                self.run_next_round(&transition.contest_id, transition.time_slot, round)
                    .await
            }
        }
    }

    async fn move_to(&self, room: &RoomRecord, to: RoomState) -> Result<RoomRecord> {
        let updated = self.registry.transition(room, to).await?;
        self.announce(room, &updated).await;
        Ok(updated)
    }

    async fn announce(&self, before: &RoomRecord, after: &RoomRecord) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(before.state, after.state);
        }

        let event = RoomStateChanged {
            room_id: after.room_id.clone(),
            contest_id: after.contest_id.clone(),
            time_slot: after.time_slot(),
            from: before.state,
            to: after.state,
            current_round: after.current_round,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.publisher.publish_room_state_changed(event).await {
            warn!("[{}] Failed to publish state change: {}", after.tag(), e);
        }
    }

    /// Catalog definition of the room's contest, or one rebuilt from the room
    /// record when the catalog no longer lists it
    async fn contest_for(&self, room: &RoomRecord) -> Result<ContestDefinition> {
        if let Some(contest) = self.catalog.contest_by_id(&room.contest_id).await? {
            return Ok(contest);
        }

        warn!(
            "[{}] Contest missing from catalog, matching without preferred opponents",
            room.tag()
        );
        Ok(ContestDefinition {
            id: room.contest_id.clone(),
            name: String::new(),
            contest_start_ms: room.join_time_ms,
            waiting_time_ms: room.game_start_ms - room.join_time_ms,
            game_start_ms: room.game_start_ms,
            capacity: room.capacity,
            max_users: room.max_users,
            no_of_rounds: room.no_of_rounds,
            round_duration_secs: (room.round_duration_ms / 1000).max(0) as u64,
            is_private: false,
            allows_preferred_opponent: false,
            is_tournament: true,
            entry_fee: 0.0,
            prize_pool: 0.0,
            winner_count: 0,
            total_joined: 0,
            extra: serde_json::Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::collaborators::StoreUserService;
    use crate::matchmaking::{MatchmakingSettings, RoundRobinPlacement};
    use crate::store::{keys, InMemoryStore, StoreGateway};
    use crate::types::ContestEvent;

    struct Harness {
        store: Arc<InMemoryStore>,
        registry: Arc<RoomRegistry>,
        scheduler: Arc<RoundScheduler>,
        publisher: Arc<MockEventPublisher>,
        metrics: Arc<MetricsCollector>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<dyn StoreGateway> = store.clone();
        let publisher = Arc::new(MockEventPublisher::new());
        let registry = Arc::new(RoomRegistry::new(shared.clone(), Duration::from_secs(3600)));
        let catalog = Arc::new(ContestCatalog::new(shared.clone(), Duration::ZERO));
        let users = Arc::new(StoreUserService::new(
            shared.clone(),
            publisher.clone(),
            Vec::new(),
            Duration::from_secs(3600),
        ));
        let engine = Arc::new(MatchmakingEngine::new(
            shared.clone(),
            users,
            Arc::new(RoundRobinPlacement::new(vec!["gs-1".to_string()]).unwrap()),
            MatchmakingSettings::default(),
        ));
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let scheduler = Arc::new(
            RoundScheduler::new(
                registry.clone(),
                catalog,
                engine,
                publisher.clone(),
                DeadlineIndex::new(shared, Duration::from_secs(600)),
                SchedulerSettings::default(),
            )
            .with_metrics(metrics.clone()),
        );

        Harness {
            store,
            registry,
            scheduler,
            publisher,
            metrics,
        }
    }

    fn contest(game_start_ms: i64, rounds: u32) -> ContestDefinition {
        serde_json::from_value(serde_json::json!({
            "cid": "c1",
            "contestStart": game_start_ms - 60_000,
            "GameStartTime": game_start_ms,
            "tt": 2,
            "MaxUsers": 100,
            "NoOfRound": rounds,
            "Duration": 60
        }))
        .unwrap()
    }

    async fn room_with_players(h: &Harness, game_start_ms: i64, rounds: u32, joined: usize) -> RoomRecord {
        let room = h
            .registry
            .create_room(RoomRecord::for_contest(&contest(game_start_ms, rounds), 30_000), 0)
            .await
            .unwrap()
            .into_room();
        for i in 0..joined {
            h.registry
                .add_joined_player("c1", game_start_ms, &format!("p{}", i))
                .await
                .unwrap();
        }
        room
    }

    fn states(publisher: &MockEventPublisher) -> Vec<(RoomState, RoomState)> {
        publisher
            .get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                ContestEvent::RoomStateChanged(change) => Some((change.from, change.to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_low_fill_cancels() {
        let h = harness();
        room_with_players(&h, 10_000, 1, 49).await;

        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Cancelled);
        assert!(h.publisher.game_joins().is_empty());
        assert_eq!(h.metrics.rooms().rooms_cancelled_total.get(), 1);
    }

    #[tokio::test]
    async fn test_half_fill_starts_round_one() {
        let h = harness();
        room_with_players(&h, 10_000, 3, 50).await;

        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::GameStart);
        assert_eq!(room.current_round, 1);
        assert_eq!(h.publisher.game_joins().len(), 50);
        assert_eq!(
            states(&h.publisher),
            vec![
                (RoomState::AcceptJoining, RoomState::PreStartingConfig),
                (RoomState::PreStartingConfig, RoomState::GameStart),
            ]
        );

        let pending = h.scheduler.deadlines().pending_for_room("c1", 10_000).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.phase, TransitionPhase::NextRound(1));
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_next_round_uses_winners() {
        let h = harness();
        room_with_players(&h, 10_000, 3, 50).await;
        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();
        h.publisher.clear_events();

        for winner in ["p1", "p3", "p5"] {
            h.store
                .set_add(&keys::round_winners(1, "c1", 10_000), winner)
                .await
                .unwrap();
        }

        h.scheduler.run_next_round("c1", 10_000, 1).await.unwrap();

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::GameStart);
        assert_eq!(room.current_round, 2);
        let joins = h.publisher.game_joins();
        assert_eq!(joins.len(), 3);
        assert!(joins.iter().all(|join| join.ticket.round == 2));

        // A late duplicate of round 1's timer changes nothing
        h.scheduler.run_next_round("c1", 10_000, 1).await.unwrap();
        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.current_round, 2);
        h.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_last_round_completes_and_clears_schedule() {
        let h = harness();
        room_with_players(&h, 10_000, 1, 60).await;
        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();
        h.scheduler.shutdown();

        h.scheduler.run_next_round("c1", 10_000, 1).await.unwrap();

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Completed);
        assert!(h
            .scheduler
            .deadlines()
            .pending_for_room("c1", 10_000)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_rooms_ignore_callbacks() {
        let h = harness();
        room_with_players(&h, 10_000, 2, 10).await;
        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();
        h.publisher.clear_events();

        h.scheduler.run_pre_start("c1", 10_000).await.unwrap();
        h.scheduler.run_next_round("c1", 10_000, 1).await.unwrap();

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Cancelled);
        assert!(h.publisher.get_published_events().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_past_start() {
        let h = harness();
        let room = RoomRecord::for_contest(&contest(1_000, 1), 30_000);
        assert!(h.scheduler.schedule_pre_start(&room, 1_000).await.is_err());
        assert!(h.scheduler.deadlines().pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_timer_chain_runs_to_completion() {
        let h = harness();
        let now = now_millis();
        let game_start = now + 5_000;
        room_with_players(&h, game_start, 3, 60).await;
        let room = h.registry.find_room("c1", game_start).await.unwrap().unwrap();

        h.scheduler.schedule_pre_start(&room, now).await.unwrap();
        assert_eq!(h.scheduler.armed_count(), 1);

        // Pre-start plus three rounds of 60s and a 30s buffer each
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(95)).await;
        }

        let room = h.registry.find_room("c1", game_start).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Completed);
        assert_eq!(room.current_round, 3);
        assert_eq!(h.scheduler.armed_count(), 0);
        assert!(h.scheduler.deadlines().pending().await.unwrap().is_empty());
        assert_eq!(h.metrics.rooms().rooms_completed_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_fires_overdue_entries() {
        let h = harness();
        room_with_players(&h, 10_000, 1, 10).await;
        h.scheduler
            .deadlines()
            .record(
                &ScheduledTransition::new("c1", 10_000, TransitionPhase::PreStart),
                10_000,
            )
            .await
            .unwrap();

        assert_eq!(h.scheduler.recover(20_000).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Cancelled);
        assert!(h.scheduler.deadlines().pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_transition_runs_after_claim_lapses() {
        let h = harness();
        room_with_players(&h, 10_000, 1, 10).await;
        let transition = ScheduledTransition::new("c1", 10_000, TransitionPhase::PreStart);
        h.scheduler.deadlines().record(&transition, 10_000).await.unwrap();
        // Held by a process that died mid-transition
        assert!(h.scheduler.deadlines().claim(&transition).await.unwrap());

        h.scheduler.recover(20_000).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::AcceptJoining);
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(h.scheduler.deadlines().pending().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(601)).await;

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Cancelled);
        assert_eq!(h.scheduler.armed_count(), 0);
        assert!(h.scheduler.deadlines().pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transition_is_rearmed() {
        let h = harness();
        let room = room_with_players(&h, 10_000, 1, 10).await;
        let room_key = keys::room("c1", 10_000);
        h.store
            .hash_set(&room_key, &[("state".to_string(), "99".to_string())])
            .await
            .unwrap();
        let transition = ScheduledTransition::new("c1", 10_000, TransitionPhase::PreStart);
        h.scheduler.deadlines().record(&transition, 10_000).await.unwrap();

        h.scheduler.recover(20_000).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(
            h.metrics
                .scheduler()
                .transition_stalls_total
                .with_label_values(&["pre_start"])
                .get(),
            1
        );
        assert_eq!(h.scheduler.armed_count(), 1);
        assert_eq!(h.scheduler.deadlines().pending().await.unwrap().len(), 1);

        // The store recovers before the next attempt
        h.store.hash_set(&room_key, &room.to_fields()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(601)).await;

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::Cancelled);
        assert!(h.scheduler.deadlines().pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_finished_elsewhere_is_dropped() {
        let h = harness();
        room_with_players(&h, 10_000, 1, 10).await;
        let transition = ScheduledTransition::new("c1", 10_000, TransitionPhase::PreStart);
        h.scheduler.deadlines().record(&transition, 10_000).await.unwrap();
        h.scheduler.recover(20_000).await.unwrap();
        // Another process completes it before the local timer runs
        h.scheduler.deadlines().remove(&transition).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let room = h.registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(room.state, RoomState::AcceptJoining);
        assert_eq!(h.scheduler.armed_count(), 0);
    }
}
