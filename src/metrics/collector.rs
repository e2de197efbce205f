//! Metrics collection using Prometheus

use crate::contest::lifecycle::RoomState;
use crate::types::GamePriority;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the contest service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    room_metrics: RoomMetrics,
    round_metrics: RoundMetrics,
    player_metrics: PlayerMetrics,
    scheduler_metrics: SchedulerMetrics,
    broadcast_metrics: BroadcastMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Events published, by event and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Room lifecycle metrics
#[derive(Clone)]
pub struct RoomMetrics {
    pub rooms_created_total: IntCounter,
    pub rooms_cancelled_total: IntCounter,
    pub rooms_completed_total: IntCounter,
    /// Transitions by (from, to)
    pub state_transitions_total: IntCounterVec,
    /// Fill ratio observed at pre-start
    pub fill_ratio: Histogram,
}

/// Round and matchmaking metrics
#[derive(Clone)]
pub struct RoundMetrics {
    pub rounds_started_total: IntCounter,
    /// Tickets issued by tier
    pub tickets_issued_total: IntCounterVec,
    /// Groups formed by tier
    pub groups_formed_total: IntCounterVec,
    /// Join dispatches the game-assignment service rejected
    pub dispatch_failures_total: IntCounter,
}

/// Player-facing operation metrics
#[derive(Clone)]
pub struct PlayerMetrics {
    /// Subscribe attempts by result
    pub joins_total: IntCounterVec,
    /// Presence attempts by result
    pub presence_total: IntCounterVec,
}

/// Deferred transition metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    /// Timers currently armed in this process
    pub armed_timers: IntGauge,
    pub transitions_fired_total: IntCounterVec,
    pub transition_retries_total: IntCounterVec,
    /// Transitions that exhausted their retries
    pub transition_stalls_total: IntCounterVec,
    /// Entries picked up by the startup recovery scan
    pub recovered_total: IntCounter,
}

/// Join counter broadcaster metrics
#[derive(Clone)]
pub struct BroadcastMetrics {
    pub broadcasts_total: IntCounter,
    pub contests_changed_total: IntCounter,
    pub iteration_failures_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Facade operation durations
    pub operation_duration: HistogramVec,

    /// Time to build and dispatch one round of tickets
    pub matchmaking_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        Ok(Self {
            service_metrics: ServiceMetrics::new(&registry)?,
            room_metrics: RoomMetrics::new(&registry)?,
            round_metrics: RoundMetrics::new(&registry)?,
            player_metrics: PlayerMetrics::new(&registry)?,
            scheduler_metrics: SchedulerMetrics::new(&registry)?,
            broadcast_metrics: BroadcastMetrics::new(&registry)?,
            performance_metrics: PerformanceMetrics::new(&registry)?,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn rooms(&self) -> &RoomMetrics {
        &self.room_metrics
    }

    pub fn rounds(&self) -> &RoundMetrics {
        &self.round_metrics
    }

    pub fn players(&self) -> &PlayerMetrics {
        &self.player_metrics
    }

    pub fn scheduler(&self) -> &SchedulerMetrics {
        &self.scheduler_metrics
    }

    pub fn broadcast(&self) -> &BroadcastMetrics {
        &self.broadcast_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    pub fn record_room_created(&self) {
        self.room_metrics.rooms_created_total.inc();
    }

    /// Record a lifecycle transition, bumping the terminal counters too
    pub fn record_transition(&self, from: RoomState, to: RoomState) {
        self.room_metrics
            .state_transitions_total
            .with_label_values(&[from.as_label(), to.as_label()])
            .inc();

        match to {
            RoomState::Cancelled => self.room_metrics.rooms_cancelled_total.inc(),
            RoomState::Completed => self.room_metrics.rooms_completed_total.inc(),
            RoomState::GameStart => self.round_metrics.rounds_started_total.inc(),
            _ => {}
        }
    }

    pub fn record_fill_ratio(&self, ratio: f64) {
        self.room_metrics.fill_ratio.observe(ratio);
    }

    pub fn record_tickets_issued(&self, tier: GamePriority, groups: usize, tickets: usize) {
        let label = tier.to_string();
        self.round_metrics
            .tickets_issued_total
            .with_label_values(&[label.as_str()])
            .inc_by(tickets as u64);
        self.round_metrics
            .groups_formed_total
            .with_label_values(&[label.as_str()])
            .inc_by(groups as u64);
    }

    pub fn record_dispatch_failure(&self) {
        self.round_metrics.dispatch_failures_total.inc();
    }

    pub fn record_join(&self, result: &str) {
        self.player_metrics
            .joins_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_presence(&self, result: &str) {
        self.player_metrics
            .presence_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_timer_armed(&self) {
        self.scheduler_metrics.armed_timers.inc();
    }

    pub fn record_timer_finished(&self) {
        self.scheduler_metrics.armed_timers.dec();
    }

    pub fn record_transition_fired(&self, phase: &str) {
        self.scheduler_metrics
            .transitions_fired_total
            .with_label_values(&[phase])
            .inc();
    }

    pub fn record_transition_retry(&self, phase: &str) {
        self.scheduler_metrics
            .transition_retries_total
            .with_label_values(&[phase])
            .inc();
    }

    pub fn record_transition_stall(&self, phase: &str) {
        self.scheduler_metrics
            .transition_stalls_total
            .with_label_values(&[phase])
            .inc();
    }

    pub fn record_recovered(&self, count: usize) {
        self.scheduler_metrics.recovered_total.inc_by(count as u64);
    }

    pub fn record_broadcast(&self, changed: usize) {
        self.broadcast_metrics.broadcasts_total.inc();
        self.broadcast_metrics
            .contests_changed_total
            .inc_by(changed as u64);
    }

    pub fn record_broadcast_failure(&self) {
        self.broadcast_metrics.iteration_failures_total.inc();
    }

    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_matchmaking(&self, duration: Duration) {
        self.performance_metrics
            .matchmaking_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("mega_contest_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new("mega_contest_events_published_total", "Events published"),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "mega_contest_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("mega_contest_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl RoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rooms_created_total =
            IntCounter::new("mega_contest_rooms_created_total", "Rooms created")?;
        registry.register(Box::new(rooms_created_total.clone()))?;

        let rooms_cancelled_total = IntCounter::new(
            "mega_contest_rooms_cancelled_total",
            "Rooms cancelled for low fill",
        )?;
        registry.register(Box::new(rooms_cancelled_total.clone()))?;

        let rooms_completed_total =
            IntCounter::new("mega_contest_rooms_completed_total", "Rooms completed")?;
        registry.register(Box::new(rooms_completed_total.clone()))?;

        let state_transitions_total = IntCounterVec::new(
            Opts::new(
                "mega_contest_state_transitions_total",
                "Room state transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(state_transitions_total.clone()))?;

        let fill_ratio = Histogram::with_opts(
            HistogramOpts::new("mega_contest_fill_ratio", "Room fill ratio at pre-start")
                .buckets(vec![0.1, 0.25, 0.5, 0.75, 0.9, 1.0]),
        )?;
        registry.register(Box::new(fill_ratio.clone()))?;

        Ok(Self {
            rooms_created_total,
            rooms_cancelled_total,
            rooms_completed_total,
            state_transitions_total,
            fill_ratio,
        })
    }
}

impl RoundMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rounds_started_total =
            IntCounter::new("mega_contest_rounds_started_total", "Rounds started")?;
        registry.register(Box::new(rounds_started_total.clone()))?;

        let tickets_issued_total = IntCounterVec::new(
            Opts::new("mega_contest_tickets_issued_total", "Game tickets issued"),
            &["tier"],
        )?;
        registry.register(Box::new(tickets_issued_total.clone()))?;

        let groups_formed_total = IntCounterVec::new(
            Opts::new("mega_contest_groups_formed_total", "Game groups formed"),
            &["tier"],
        )?;
        registry.register(Box::new(groups_formed_total.clone()))?;

        let dispatch_failures_total = IntCounter::new(
            "mega_contest_dispatch_failures_total",
            "Failed game join dispatches",
        )?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;

        Ok(Self {
            rounds_started_total,
            tickets_issued_total,
            groups_formed_total,
            dispatch_failures_total,
        })
    }
}

impl PlayerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("mega_contest_joins_total", "Contest subscribe attempts"),
            &["result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let presence_total = IntCounterVec::new(
            Opts::new("mega_contest_presence_total", "Presence attempts"),
            &["result"],
        )?;
        registry.register(Box::new(presence_total.clone()))?;

        Ok(Self {
            joins_total,
            presence_total,
        })
    }
}

impl SchedulerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let armed_timers = IntGauge::new("mega_contest_armed_timers", "Timers armed")?;
        registry.register(Box::new(armed_timers.clone()))?;

        let transitions_fired_total = IntCounterVec::new(
            Opts::new(
                "mega_contest_transitions_fired_total",
                "Scheduled transitions fired",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(transitions_fired_total.clone()))?;

        let transition_retries_total = IntCounterVec::new(
            Opts::new(
                "mega_contest_transition_retries_total",
                "Scheduled transition retries",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(transition_retries_total.clone()))?;

        let transition_stalls_total = IntCounterVec::new(
            Opts::new(
                "mega_contest_transition_stalls_total",
                "Scheduled transitions that exhausted retries",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(transition_stalls_total.clone()))?;

        let recovered_total = IntCounter::new(
            "mega_contest_recovered_transitions_total",
            "Transitions re-armed by the recovery scan",
        )?;
        registry.register(Box::new(recovered_total.clone()))?;

        Ok(Self {
            armed_timers,
            transitions_fired_total,
            transition_retries_total,
            transition_stalls_total,
            recovered_total,
        })
    }
}

impl BroadcastMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let broadcasts_total =
            IntCounter::new("mega_contest_broadcasts_total", "Counter broadcasts sent")?;
        registry.register(Box::new(broadcasts_total.clone()))?;

        let contests_changed_total = IntCounter::new(
            "mega_contest_contests_changed_total",
            "Contest counters included in broadcasts",
        )?;
        registry.register(Box::new(contests_changed_total.clone()))?;

        let iteration_failures_total = IntCounter::new(
            "mega_contest_broadcast_failures_total",
            "Broadcaster iterations that failed",
        )?;
        registry.register(Box::new(iteration_failures_total.clone()))?;

        Ok(Self {
            broadcasts_total,
            contests_changed_total,
            iteration_failures_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "mega_contest_operation_duration_seconds",
                "Facade operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let matchmaking_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mega_contest_matchmaking_duration_seconds",
                "Ticket generation and dispatch time per round",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(matchmaking_duration.clone()))?;

        Ok(Self {
            operation_duration,
            matchmaking_duration,
        })
    }
}
