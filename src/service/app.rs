//! Application state and service coordination
//!
//! Every component is constructed once here and shared as an `Arc` handle.
//! `ServiceContext` holds the wired components; `AppState` owns the context
//! together with the HTTP server and the background tasks.

use crate::amqp::{
    AmqpConfig, AmqpConnection, AmqpEventPublisher, EventPublisher, LoggingEventPublisher,
    MeteredEventPublisher, PublisherConfig,
};
use crate::broadcast::JoinCounterBroadcaster;
use crate::collaborators::{StoreUserService, StoreWalletService};
use crate::config::AppConfig;
use crate::contest::{ContestCatalog, RoomRegistry};
use crate::facade::{ContestOrchestrator, OrchestratorDeps};
use crate::matchmaking::{MatchmakingEngine, RoundRobinPlacement};
use crate::metrics::health::{HealthServer, HealthServerConfig};
use crate::metrics::{MetricsCollector, MetricsService};
use crate::scheduler::{DeadlineIndex, RoundScheduler};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::store::{InMemoryStore, PrizeBreakupSource, RedisStore, StaticPrizeBreakupSource, StoreGateway};
use crate::utils::now_millis;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Period of the health metrics task
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store connection error: {message}")]
    StoreConnection { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Wired service components, shared with the HTTP handlers
pub struct ServiceContext {
    config: AppConfig,
    store: Arc<dyn StoreGateway>,
    publisher: Arc<dyn EventPublisher>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    catalog: Arc<ContestCatalog>,
    registry: Arc<RoomRegistry>,
    engine: Arc<MatchmakingEngine>,
    scheduler: Arc<RoundScheduler>,
    orchestrator: Arc<ContestOrchestrator>,
    broadcaster: Arc<JoinCounterBroadcaster>,
    metrics: Arc<MetricsCollector>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl ServiceContext {
    /// Wire every component on top of the given store and publisher
    pub fn build(
        config: AppConfig,
        store: Arc<dyn StoreGateway>,
        publisher: Arc<dyn EventPublisher>,
        prize_source: Arc<dyn PrizeBreakupSource>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, ServiceError> {
        let tournament = &config.tournament;

        let catalog = Arc::new(ContestCatalog::new(
            store.clone(),
            config.catalog_cache_ttl(),
        ));
        let registry = Arc::new(RoomRegistry::new(store.clone(), config.room_ttl()));
        let users = Arc::new(StoreUserService::new(
            store.clone(),
            publisher.clone(),
            tournament.testers.clone(),
            config.room_ttl(),
        ));
        let transactions = Arc::new(StoreWalletService::new(store.clone()));
        let placement = Arc::new(
            RoundRobinPlacement::new(tournament.game_server_addresses.clone()).map_err(|e| {
                ServiceError::Initialization {
                    message: format!("Failed to set up game server placement: {}", e),
                }
            })?,
        );

        let engine = Arc::new(
            MatchmakingEngine::new(
                store.clone(),
                users.clone(),
                placement.clone(),
                config.matchmaking_settings(),
            )
            .with_metrics(metrics.clone()),
        );

        let scheduler_settings = config.scheduler_settings();
        let deadlines = DeadlineIndex::new(store.clone(), scheduler_settings.claim_ttl);
        let scheduler = Arc::new(
            RoundScheduler::new(
                registry.clone(),
                catalog.clone(),
                engine.clone(),
                publisher.clone(),
                deadlines,
                scheduler_settings,
            )
            .with_metrics(metrics.clone()),
        );

        let orchestrator = Arc::new(
            ContestOrchestrator::new(
                OrchestratorDeps {
                    store: store.clone(),
                    catalog: catalog.clone(),
                    registry: registry.clone(),
                    scheduler: scheduler.clone(),
                    engine: engine.clone(),
                    placement,
                    users,
                    transactions,
                    prize_source,
                },
                config.orchestrator_settings(),
            )
            .with_metrics(metrics.clone()),
        );

        let broadcaster = Arc::new(
            JoinCounterBroadcaster::new(
                catalog.clone(),
                publisher.clone(),
                config.counter_interval(),
            )
            .with_metrics(metrics.clone()),
        );

        Ok(Self {
            config,
            store,
            publisher,
            amqp_connection: None,
            catalog,
            registry,
            engine,
            scheduler,
            orchestrator,
            broadcaster,
            metrics,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Attach the broker connection the publisher runs on
    pub fn with_amqp_connection(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp_connection = Some(connection);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn StoreGateway> {
        self.store.clone()
    }

    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn catalog(&self) -> Arc<ContestCatalog> {
        self.catalog.clone()
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    pub fn engine(&self) -> Arc<MatchmakingEngine> {
        self.engine.clone()
    }

    pub fn scheduler(&self) -> Arc<RoundScheduler> {
        self.scheduler.clone()
    }

    pub fn orchestrator(&self) -> Arc<ContestOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn broadcaster(&self) -> Arc<JoinCounterBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    fn running_flag(&self) -> Arc<RwLock<bool>> {
        self.is_running.clone()
    }
}

/// Main application state: the wired components plus everything that runs
pub struct AppState {
    context: Arc<ServiceContext>,

    /// Metrics collector and the HTTP server
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} tournament service", config.service.name);
        info!(
            "Configuration: store={}, amqp={}",
            if config.store.use_in_memory {
                "in-memory"
            } else {
                config.store.redis_url.as_str()
            },
            if config.amqp.enabled {
                config.amqp.url.as_str()
            } else {
                "disabled"
            }
        );

        let metrics = Self::initialize_metrics_collector()?;
        let store = Self::initialize_store(&config).await?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher: Arc<dyn EventPublisher> = Arc::new(MeteredEventPublisher::new(
            Self::initialize_publisher(amqp_connection.as_deref()).await?,
            metrics.clone(),
        ));

        let mut context = ServiceContext::build(
            config,
            store,
            publisher,
            Arc::new(StaticPrizeBreakupSource::new()),
            metrics,
        )?;
        if let Some(connection) = amqp_connection {
            context = context.with_amqp_connection(connection);
        }

        Ok(Self::from_context(Arc::new(context)))
    }

    /// Build the application around already wired components
    pub fn from_context(context: Arc<ServiceContext>) -> Self {
        let health_config = HealthServerConfig {
            port: context.config().service.http_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, context.metrics()).with_context(context.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(context.metrics(), health_server));

        Self {
            context,
            metrics_service,
            background_tasks: Vec::new(),
        }
    }

    /// Start the HTTP server, resume pending schedules and start background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} tournament service", self.config().service.name);

        self.context.set_running(true).await;

        self.start_metrics_service().await?;

        if self.config().tournament.recover_on_start {
            self.recover_schedules().await?;
        } else {
            info!("Schedule recovery disabled - pending transitions stay parked");
        }

        self.start_background_tasks().await?;

        info!("✅ {} tournament service started successfully", self.config().service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config().service.name);

        self.context.set_running(false).await;

        // Pending transitions stay in the durable index for the next process
        let aborted = self.context.scheduler().shutdown();
        info!("Disarmed {} in-process timers", aborted);

        self.stop_background_tasks().await;

        info!("Stopping HTTP server...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop HTTP server: {}", e);
        } else {
            info!("✅ HTTP server stopped");
        }

        if let Some(connection) = self.context.amqp_connection() {
            match connection.close().await {
                Ok(()) => info!("✅ AMQP connection closed"),
                Err(e) => warn!("Failed to close AMQP connection: {}", e),
            }
        }

        let metrics = self.context.metrics();
        info!(
            "Final statistics: rooms created {}, cancelled {}, completed {}, rounds started {}",
            metrics.rooms().rooms_created_total.get(),
            metrics.rooms().rooms_cancelled_total.get(),
            metrics.rooms().rooms_completed_total.get(),
            metrics.rounds().rounds_started_total.get()
        );
        info!("✅ {} shutdown completed", self.config().service.name);

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        self.context.config()
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        self.context.clone()
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        self.context.is_running().await
    }

    pub fn orchestrator(&self) -> Arc<ContestOrchestrator> {
        self.context.orchestrator()
    }

    pub fn scheduler(&self) -> Arc<RoundScheduler> {
        self.context.scheduler()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    fn initialize_metrics_collector() -> Result<Arc<MetricsCollector>, ServiceError> {
        let collector = MetricsCollector::new().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create metrics collector: {}", e),
        })?;
        Ok(Arc::new(collector))
    }

    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn StoreGateway>, ServiceError> {
        if config.store.use_in_memory {
            warn!("Using the in-memory store - rooms are not shared with other processes");
            return Ok(Arc::new(InMemoryStore::new()));
        }

        info!("Connecting to shared store at {}", config.store.redis_url);
        let store = RedisStore::connect(&config.store.redis_url)
            .await
            .map_err(|e| ServiceError::StoreConnection {
                message: format!("{:#}", e),
            })?;
        Ok(Arc::new(store))
    }

    async fn initialize_amqp(
        config: &AppConfig,
    ) -> Result<Option<Arc<AmqpConnection>>, ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled - events will only be logged");
            return Ok(None);
        }

        let mut amqp_config =
            AmqpConfig::from_url(&config.amqp.url).map_err(|e| ServiceError::Configuration {
                message: format!("{:#}", e),
            })?;
        amqp_config.max_retries = config.amqp.max_retry_attempts;
        amqp_config.retry_delay_ms = config.amqp.retry_delay_ms;

        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );
        let connection = tokio::time::timeout(
            config.amqp_connection_timeout(),
            AmqpConnection::new(amqp_config),
        )
        .await
        .map_err(|_| ServiceError::AmqpConnection {
            message: format!(
                "Timed out after {:?} connecting to the broker",
                config.amqp_connection_timeout()
            ),
        })?
        .map_err(|e| ServiceError::AmqpConnection {
            message: format!("{:#}", e),
        })?;

        Ok(Some(Arc::new(connection)))
    }

    async fn initialize_publisher(
        connection: Option<&AmqpConnection>,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let Some(connection) = connection else {
            return Ok(Arc::new(LoggingEventPublisher));
        };

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("{:#}", e),
                })?;
        let publisher = AmqpEventPublisher::new(channel, PublisherConfig::default())
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {:#}", e),
            })?;
        Ok(Arc::new(publisher))
    }

    /// Start the HTTP server for health, metrics and the contest endpoints
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!(
            "Starting HTTP server on port {}",
            self.config().service.http_port
        );

        let metrics_service = self.metrics_service.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("HTTP server failed: {}", e);
            }
        });

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.background_tasks.push(server_task);
        info!("✅ HTTP server started");
        Ok(())
    }

    /// Re-arm transitions left in the durable index by earlier processes
    async fn recover_schedules(&self) -> Result<(), ServiceError> {
        let recovered = self
            .context
            .scheduler()
            .recover(now_millis())
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Schedule recovery failed: {:#}", e),
            })?;
        info!("Recovered {} pending transitions", recovered);
        Ok(())
    }

    /// Start background tasks
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        info!("Starting background tasks...");

        info!(
            "Starting join counter broadcaster ({}ms interval)...",
            self.context.broadcaster().interval().as_millis()
        );
        let broadcaster_task = {
            let broadcaster = self.context.broadcaster();
            let is_running = self.context.running_flag();
            tokio::spawn(broadcaster.run(is_running))
        };

        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );
        let health_metrics_task = {
            let context = self.context.clone();
            let is_running = self.context.running_flag();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;
                    update_health_metrics(&context).await;
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(broadcaster_task);
        self.background_tasks.push(health_metrics_task);

        info!("2 background tasks started successfully");
        Ok(())
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        info!("✅ All {} background tasks stopped", task_count);
    }
}

/// Refresh uptime and health gauges from a full health check
async fn update_health_metrics(context: &ServiceContext) {
    let metrics = context.metrics();
    metrics
        .service()
        .uptime_seconds
        .set(context.uptime().as_secs() as i64);
    metrics
        .scheduler()
        .armed_timers
        .set(context.scheduler().armed_count() as i64);

    let health = HealthCheck::check(context).await;
    metrics.update_health_status(health.status.gauge_value());
    for check in &health.checks {
        metrics.update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
    }

    match health.status {
        HealthStatus::Healthy => debug!("Service health: {}", health.status),
        HealthStatus::Degraded | HealthStatus::Unhealthy => {
            warn!("Service health: {}", health.status);
            for check in health.checks.iter().filter(|c| c.status != HealthStatus::Healthy) {
                warn!(
                    "  {}: {}",
                    check.name,
                    check.message.as_deref().unwrap_or("no details")
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.store.use_in_memory = true;
        config.amqp.enabled = false;
        config.service.http_port = 0;
        config
    }

    fn test_context() -> ServiceContext {
        let store: Arc<dyn StoreGateway> = Arc::new(InMemoryStore::new());
        ServiceContext::build(
            test_config(),
            store,
            Arc::new(MockEventPublisher::new()),
            Arc::new(StaticPrizeBreakupSource::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_app_state_in_memory() {
        let state = AppState::new(test_config()).await.unwrap();
        assert!(!state.is_running().await);
        assert!(state.context().amqp_connection().is_none());
        assert!(state.orchestrator().joining_enabled());
    }

    #[test]
    fn test_empty_server_list_fails_initialization() {
        let mut config = test_config();
        config.tournament.game_server_addresses.clear();

        let result = ServiceContext::build(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(MockEventPublisher::new()),
            Arc::new(StaticPrizeBreakupSource::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        assert!(matches!(result, Err(ServiceError::Initialization { .. })));
    }

    #[tokio::test]
    async fn test_running_flag() {
        let context = test_context();
        assert!(!context.is_running().await);

        context.set_running(true).await;
        assert!(context.is_running().await);
        assert!(*context.running_flag().read().await);
    }

    #[tokio::test]
    async fn test_health_metrics_update() {
        let context = test_context();
        context.set_running(true).await;

        update_health_metrics(&context).await;

        let metrics = context.metrics();
        assert_eq!(metrics.service().health_status.get(), 2);
        assert_eq!(
            metrics
                .service()
                .component_health
                .with_label_values(&["store"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails() {
        let mut config = test_config();
        config.store.use_in_memory = false;
        config.store.redis_url = "not-a-url".to_string();

        let result = AppState::new(config).await;
        assert!(matches!(result, Err(ServiceError::StoreConnection { .. })));
    }
}
