//! Periodic join counter broadcast
//!
//! Every period the full counter map is read and diffed against the previous
//! snapshot; changed contests go out as one batched event, both to the
//! message broker and to in-process stream subscribers.

use crate::amqp::publisher::EventPublisher;
use crate::contest::ContestCatalog;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::types::{ContestId, CounterDelta, CounterUpdate};
use crate::utils::current_timestamp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Stream subscribers that fall this far behind start losing updates
const STREAM_CAPACITY: usize = 256;

/// Contests whose totals differ from `previous`, sorted by contest id.
/// With no previous snapshot every contest counts as changed.
pub fn changed_contests(
    previous: Option<&HashMap<ContestId, i64>>,
    current: &HashMap<ContestId, i64>,
) -> Vec<CounterDelta> {
    let mut deltas: Vec<CounterDelta> = current
        .iter()
        .filter(|(contest_id, count)| {
            previous.map_or(true, |prev| prev.get(*contest_id) != Some(*count))
        })
        .map(|(contest_id, count)| CounterDelta {
            contest_id: contest_id.clone(),
            player_joined: *count,
        })
        .collect();

    deltas.sort_by(|a, b| a.contest_id.cmp(&b.contest_id));
    deltas
}

pub struct JoinCounterBroadcaster {
    catalog: Arc<ContestCatalog>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    snapshot: Mutex<Option<HashMap<ContestId, i64>>>,
    sender: broadcast::Sender<CounterUpdate>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl JoinCounterBroadcaster {
    pub fn new(
        catalog: Arc<ContestCatalog>,
        publisher: Arc<dyn EventPublisher>,
        interval: Duration,
    ) -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            catalog,
            publisher,
            interval,
            snapshot: Mutex::new(None),
            sender,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Receive every batched update from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CounterUpdate> {
        self.sender.subscribe()
    }

    /// One broadcast iteration. Returns the update sent, if anything changed.
    ///
    /// The snapshot only advances when the counters were read successfully.
    pub async fn tick(&self) -> Result<Option<CounterUpdate>> {
        let current = self.catalog.join_counters().await?;

        let mut snapshot = self.snapshot.lock().await;
        let deltas = changed_contests(snapshot.as_ref(), &current);
        *snapshot = Some(current);
        drop(snapshot);

        if deltas.is_empty() {
            return Ok(None);
        }

        let update = CounterUpdate {
            deltas,
            timestamp: current_timestamp(),
        };
        debug!("Broadcasting {} join counter changes", update.deltas.len());

        // No stream subscribers is not an error
        let _ = self.sender.send(update.clone());

        if let Err(e) = self.publisher.publish_counter_update(update.clone()).await {
            warn!("Failed to publish join counter update: {}", e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_broadcast(update.deltas.len());
        }

        Ok(Some(update))
    }

    /// Tick every period while `is_running` holds. Failed iterations are
    /// logged and the loop carries on.
    pub async fn run(self: Arc<Self>, is_running: Arc<RwLock<bool>>) {
        info!(
            "Join counter broadcaster started ({}ms period)",
            self.interval.as_millis()
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while *is_running.read().await {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!("Join counter broadcast failed: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_broadcast_failure();
                }
            }
        }

        info!("Join counter broadcaster stopped");
    }
}
