//! HTTP server for health checks, Prometheus metrics and the contest endpoints
//!
//! Probes and metrics are always served. The contest routes are merged in
//! once the server is given the wired service context.

use crate::facade::routes::{contest_routes, ContestRoutesState};
use crate::metrics::collector::MetricsCollector;
use crate::service::app::ServiceContext;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "mega-contest";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health handlers
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<Arc<ServiceContext>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service components for health checks and the contest routes
    pub fn with_context(mut self, context: Arc<ServiceContext>) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid HTTP server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

        info!("HTTP server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let probes = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone());

        match &self.state.context {
            Some(context) => probes.merge(contest_routes(ContestRoutesState {
                orchestrator: context.orchestrator(),
                broadcaster: context.broadcaster(),
            })),
            None => probes,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping HTTP server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to HTTP server: {}", e);
        }
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/contests",
            "/contests/{id}/prize-breakup",
            "/tournament/subscribe",
            "/tournament/presence",
            "/tournament/counter/stream"
        ]
    }))
}

fn status_body(status: &str) -> serde_json::Value {
    json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let Some(context) = &state.context else {
        let mut body = status_body("unhealthy");
        body["error"] = json!("Service not initialized");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    };

    match HealthCheck::liveness_check(context).await {
        HealthStatus::Healthy => (StatusCode::OK, Json(status_body("healthy"))),
        HealthStatus::Degraded => (StatusCode::OK, Json(status_body("degraded"))),
        HealthStatus::Unhealthy => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(status_body("unhealthy")),
        ),
    }
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.context {
        Some(context) => match HealthCheck::readiness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, "Ready"),
            HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready"),
            HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.context {
        Some(context) => match HealthCheck::liveness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Metrics endpoint requested");

    match HealthEndpoints::get_metrics_text(state.metrics_collector).await {
        Ok(metrics_output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            metrics_output,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

/// Detailed statistics for humans
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let Some(context) = &state.context else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "error"
                },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    let health = HealthCheck::check(context).await;
    let stats = json!({
        "service": {
            "name": health.service,
            "version": health.version,
            "status": health.status,
            "uptime_seconds": health.stats.uptime_seconds
        },
        "rooms": {
            "created": health.stats.rooms_created,
            "cancelled": health.stats.rooms_cancelled,
            "completed": health.stats.rooms_completed,
            "rounds_started": health.stats.rounds_started
        },
        "scheduler": {
            "armed_timers": health.stats.armed_timers,
            "pending_transitions": health.stats.pending_transitions,
            "stalls": health.stats.transition_stalls
        },
        "components": health.checks,
        "timestamp": chrono::Utc::now()
    });

    (StatusCode::OK, Json(stats))
}

/// Programmatic access to the probe results
pub struct HealthEndpoints;

impl HealthEndpoints {
    pub async fn get_health_status(context: Option<Arc<ServiceContext>>) -> serde_json::Value {
        match context {
            Some(context) => match HealthCheck::liveness_check(&context).await {
                HealthStatus::Healthy => json!({"status": "healthy", "service": SERVICE_NAME}),
                HealthStatus::Degraded => json!({"status": "degraded", "service": SERVICE_NAME}),
                HealthStatus::Unhealthy => {
                    json!({"status": "unhealthy", "service": SERVICE_NAME})
                }
            },
            None => json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "error": "Service not initialized"
            }),
        }
    }

    /// Metrics in Prometheus text format
    pub async fn get_metrics_text(metrics_collector: Arc<MetricsCollector>) -> Result<String> {
        let metric_families = metrics_collector.registry().gather();
        debug!("Encoding {} metric families", metric_families.len());

        TextEncoder::new()
            .encode_to_string(&metric_families)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}
