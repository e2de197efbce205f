//! Metrics and monitoring for the contest service
//!
//! Prometheus collection plus the HTTP server that exposes health probes,
//! metrics and the contest endpoints.

pub mod collector;
pub mod health;

pub use collector::{
    BroadcastMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, PlayerMetrics,
    RoomMetrics, RoundMetrics, SchedulerMetrics, ServiceMetrics,
};
pub use health::{HealthEndpoints, HealthServer, HealthServerConfig};

use std::sync::Arc;

/// Unified metrics service that combines all monitoring capabilities
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve until `stop` is called
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }
}
