use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockyard_core::{
    load_config, validate_config, ProcessingEngine, SqliteStagingDatabase, StagingDatabase,
};
use stockyard_server::{
    api::create_router,
    state::AppState,
    wiring::{build_registry, Services},
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("stockyard {}", VERSION);

    // Determine config path
    let config_path = std::env::var("STOCKYARD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Suppliers configured: {}", config.suppliers.len());

    // Staging database: one session for the API, one per handler instance
    let database: Arc<dyn StagingDatabase> = Arc::new(
        SqliteStagingDatabase::new(&config.database.path)
            .context("Failed to open staging database")?,
    );
    let store = database
        .open_session()
        .context("Failed to open staging session")?;

    // Handlers and engine
    let services = Services::from_config(&config)?;
    let registry = build_registry(&config, &database, &services)?;
    info!(
        handlers = registry.len(),
        capacity = registry.total_capacity(),
        "Handler registry built"
    );
    let engine = Arc::new(ProcessingEngine::new(registry, config.engine.clone()));

    if config.engine.enabled {
        engine.start().await;
    } else {
        warn!("Processing engine disabled; submissions will be staged but not processed");
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, store, Arc::clone(&engine)));
    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    engine.stop().await;
    info!("Server shut down");

    served
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
