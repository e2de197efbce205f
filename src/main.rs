//! Main entry point for the mega-contest tournament service
//!
//! Loads configuration, initializes logging, wires the service and runs it
//! until a shutdown signal arrives.

use anyhow::Result;
use clap::Parser;
use mega_contest::config::{validate_config, AppConfig};
use mega_contest::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Mega Contest - scheduled multi-round tournament orchestration
#[derive(Parser)]
#[command(
    name = "mega-contest",
    version,
    about = "Tournament orchestration service for scheduled multi-round mega contests",
    long_about = "Mega Contest runs scheduled tournaments: players join a contest room before \
                 its start time, the room is cancelled or started depending on how full it is, \
                 and each round's winners are regrouped into new games until the last round."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Redis URL override
    #[arg(long, value_name = "URL", help = "Override shared store URL")]
    redis_url: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    /// Use the in-memory store
    #[arg(
        long,
        help = "Run against an in-process store (single instance, development only)"
    )]
    in_memory_store: bool,

    /// Start with joining disabled
    #[arg(long, help = "Reject subscriptions from everyone except testers")]
    disable_joining: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    };

    // The check runs outside a started service, so judge the components only
    let health = HealthCheck::check(&app_state.context()).await;
    println!("Health Check:");
    for check in &health.checks {
        println!(
            "  {}: {}{}",
            check.name,
            check.status,
            check
                .message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    }
    println!(
        "  Pending transitions: {}",
        health.stats.pending_transitions
    );

    let components_ok = health
        .checks
        .iter()
        .filter(|check| check.name != "service_running")
        .all(|check| check.status != HealthStatus::Unhealthy);
    std::process::exit(if components_ok { 0 } else { 1 });
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    let tournament = &config.tournament;

    info!("🏆 Mega Contest Tournament Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   HTTP port: {}", config.service.http_port);
    if config.store.use_in_memory {
        info!("   Store: in-memory");
    } else {
        info!("   Store: {}", config.store.redis_url);
    }
    if config.amqp.enabled {
        info!("   AMQP: {}", config.amqp.url);
    } else {
        info!("   AMQP: disabled");
    }
    info!("   Joining enabled: {}", tournament.joining_enabled);
    info!(
        "   Cancel below fill: {:.0}%",
        tournament.cancel_fill_threshold * 100.0
    );
    info!(
        "   Inter-round buffer: {}ms",
        tournament.inter_round_buffer_ms
    );
    info!(
        "   Game servers: {}",
        tournament.game_server_addresses.join(", ")
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(redis_url) = &args.redis_url {
        config.store.redis_url = redis_url.clone();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
        config.amqp.enabled = true;
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if args.in_memory_store {
        config.store.use_in_memory = true;
    }

    if args.disable_joining {
        config.tournament.joining_enabled = false;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Some(config_path) = &args.config {
        info!("Loaded configuration from: {}", config_path.display());
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ Mega Contest service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Mega Contest service stopped");
    Ok(())
}
