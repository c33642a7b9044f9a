//! Main entry point for the Counsel Match service
//!
//! Loads configuration, initializes logging, runs the matching service and
//! shuts it down gracefully on SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use counsel_match::config::{validate_config, AppConfig};
use counsel_match::service::AppState;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Counsel Match - routes waiting customers to available counselors
#[derive(Parser)]
#[command(
    name = "counsel-match",
    version,
    about = "Queueing and matching service for counseling sessions",
    long_about = "Counsel Match keeps waiting customers in leased PRIORITY and NORMAL queues, \
                 periodically pairs the head of the queue with the best-scoring available \
                 counselor, and publishes rank, queue size and match events."
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

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(
        long,
        value_name = "URL",
        help = "Publish events to this AMQP broker (enables AMQP)"
    )]
    amqp_url: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    /// Scheduler tick override
    #[arg(long, value_name = "MS", help = "Override matching tick interval")]
    tick_interval_ms: Option<u64>,

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
    info!("🚀 Counsel Match Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   HTTP port: {}", config.service.http_port);
    if config.amqp.enabled {
        info!(
            "   AMQP: {} (exchange '{}')",
            config.amqp.url, config.amqp.exchange_name
        );
    } else {
        info!("   AMQP: disabled");
    }
    info!("   Tick interval: {}ms", config.matching.tick_interval_ms);
    info!("   Lease TTL: {}s", config.matching.lease_ttl_seconds);
    info!(
        "   Stale entry bound: {}s",
        config.matching.stale_entry_seconds
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration and apply CLI overrides
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

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
        config.amqp.enabled = true;
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(tick_interval_ms) = args.tick_interval_ms {
        config.matching.tick_interval_ms = tick_interval_ms;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
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

    info!("✅ Counsel Match is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Counsel Match stopped");
    Ok(())
}
