use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alembic_core::{
    load_config, validate_config, Bootstrap, Cabinet, Composer, Crucible, LogFormat,
    LoggingConfig, MemoryPositionStore, PositionStore, Recipes, SqlitePositionStore,
};
use alembic_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long running pipelines get to stop after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("alembic: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.filter.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Returns whether every pipeline succeeded.
async fn run() -> Result<bool> {
    // Determine config path
    let config_path = std::env::var("ALEMBIC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("alembic.toml"));

    // Load configuration; logging is configured from it when possible
    let loaded = load_config(&config_path);
    init_logging(
        &loaded
            .as_ref()
            .map(|config| config.logging.clone())
            .unwrap_or_default(),
    );
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = config_hash[..16].to_string();

    info!(
        version = VERSION,
        config = ?config_path,
        config_hash = %config_hash_short,
        pipelines = config.pipelines.len(),
        recipes = config.recipes.len(),
        "Configuration loaded"
    );

    // Position store
    let positions: Arc<dyn PositionStore> = match &config.positions.path {
        Some(path) => {
            info!("Position store at {:?}", path);
            Arc::new(SqlitePositionStore::new(path).context("Failed to open position store")?)
        }
        None => {
            info!("Position store is in memory, positions are lost on exit");
            Arc::new(MemoryPositionStore::new())
        }
    };

    // Cabinet, recipes, composer and crucible
    let cabinet = Cabinet::with_builtin_jars().configure(&config.jars);
    let recipes = Recipes::new(config.recipes.clone());
    let composer = Composer::new(Arc::new(cabinet), Arc::new(recipes));
    let crucible =
        Crucible::new(composer, config.crucible.prefetch).with_position_store(positions);

    let definitions = if config.crucible.enabled {
        config.pipelines.clone()
    } else {
        info!("Crucible disabled in config, no pipelines started at boot");
        Vec::new()
    };
    let bootstrap = Bootstrap::new(crucible.clone());

    if !config.server.enabled {
        info!("Server disabled, running configured pipelines to completion");
        let summary = tokio::select! {
            summary = bootstrap.run(&definitions) => summary,
            _ = shutdown_signal() => {
                info!("Shutdown requested, cancelling pipelines");
                crucible.cancel_all();
                crucible.wait_all().await
            }
        };
        return Ok(summary.is_success());
    }

    let boot = tokio::spawn(async move { bootstrap.run(&definitions).await });

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        config_hash_short,
        crucible.clone(),
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    let cancelled = crucible.cancel_all();
    if cancelled > 0 {
        info!(cancelled, "Cancelled running pipelines");
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, crucible.wait_all()).await {
        Ok(summary) => info!(
            total = summary.total,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Pipelines stopped"
        ),
        Err(_) => warn!("Pipelines did not stop within {:?}", SHUTDOWN_GRACE),
    }
    boot.abort();

    Ok(true)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
