//! Health checks and service statistics
//!
//! Liveness only asks whether the service is running; readiness also
//! requires the shared store to answer.

use crate::service::app::ServiceContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported on the health gauge (0=unhealthy, 1=degraded, 2=healthy)
    pub fn gauge_value(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Fold a component status into the overall status
    fn merge(self, component: HealthStatus) -> HealthStatus {
        match (self, component) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn new(name: &str, started: Instant, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub rooms_created: u64,
    pub rooms_cancelled: u64,
    pub rooms_completed: u64,
    pub rounds_started: u64,
    /// Timers armed in this process
    pub armed_timers: usize,
    /// Transitions waiting in the shared due-time index
    pub pending_transitions: usize,
    pub transition_stalls: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &ServiceContext) -> Self {
        let checks = vec![
            Self::check_service_running(context).await,
            Self::check_store(context).await,
            Self::check_amqp(context),
            Self::check_scheduler(context),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                overall.merge(check.status)
            });

        HealthCheck {
            status,
            service: context.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(context).await,
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &ServiceContext) -> HealthStatus {
        if context.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - running and able to reach the shared store
    pub async fn readiness_check(context: &ServiceContext) -> HealthStatus {
        if !context.is_running().await {
            return HealthStatus::Unhealthy;
        }
        Self::check_store(context).await.status
    }

    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let started = Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck::new("service_running", started, status, message)
    }

    async fn check_store(context: &ServiceContext) -> ComponentCheck {
        let started = Instant::now();

        let (status, message) = match context.store().ping().await {
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Store ping failed: {:#}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store ping failed: {}", e)),
                )
            }
        };

        ComponentCheck::new("store", started, status, message)
    }

    /// Events still flow through the logging publisher when the broker is
    /// gone, so a closed connection only degrades the service
    fn check_amqp(context: &ServiceContext) -> ComponentCheck {
        let started = Instant::now();

        let (status, message) = match context.amqp_connection() {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed".to_string()),
            ),
            None if context.config().amqp.enabled => (
                HealthStatus::Degraded,
                Some("AMQP enabled but not connected".to_string()),
            ),
            None => (HealthStatus::Healthy, None),
        };

        ComponentCheck::new("amqp_connection", started, status, message)
    }

    fn check_scheduler(context: &ServiceContext) -> ComponentCheck {
        let started = Instant::now();
        let stalls = total_stalls(context);

        let (status, message) = if stalls == 0 {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some(format!("{} transitions exhausted their retries", stalls)),
            )
        };

        ComponentCheck::new("scheduler", started, status, message)
    }

    async fn gather_service_stats(context: &ServiceContext) -> ServiceStats {
        let metrics = context.metrics();
        let scheduler = context.scheduler();

        let pending_transitions = match scheduler.deadlines().pending().await {
            Ok(pending) => pending.len(),
            Err(e) => {
                debug!("Failed to read pending transitions for health check: {}", e);
                0
            }
        };

        ServiceStats {
            rooms_created: metrics.rooms().rooms_created_total.get(),
            rooms_cancelled: metrics.rooms().rooms_cancelled_total.get(),
            rooms_completed: metrics.rooms().rooms_completed_total.get(),
            rounds_started: metrics.rounds().rounds_started_total.get(),
            armed_timers: scheduler.armed_count(),
            pending_transitions,
            transition_stalls: total_stalls(context),
            uptime_seconds: context.uptime().as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

fn total_stalls(context: &ServiceContext) -> u64 {
    let metrics = context.metrics();
    ["pre_start", "next_round"]
        .into_iter()
        .map(|phase| {
            metrics
                .scheduler()
                .transition_stalls_total
                .with_label_values(&[phase])
                .get()
        })
        .sum()
}
