use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelforge_core::{
    load_config, validate_config, JobQueueManager, JobStore, MaintenanceLoop, PipelineRegistry,
    ProgressBroadcaster, SqliteJobStore, WorkerPool,
};
use reelforge_server::{api::create_router, state::AppState};

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

    // Determine config path
    let config_path = std::env::var("REELFORGE_CONFIG")
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

    // Create SQLite job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Build pipelines from config
    let registry = PipelineRegistry::from_config(&config.pipelines);
    if registry.is_empty() {
        info!("No pipelines configured; submissions will be rejected");
    } else {
        info!(
            "Registered pipelines: {}",
            registry.names().collect::<Vec<_>>().join(", ")
        );
    }

    let broadcaster = ProgressBroadcaster::new(config.broadcaster.channel_capacity);
    let manager = Arc::new(JobQueueManager::new(
        store,
        registry,
        config.retry.clone(),
        broadcaster,
    ));

    // Recover jobs left running by a previous process before taking new work
    let maintenance = MaintenanceLoop::new(Arc::clone(&manager), config.maintenance.clone());
    let report = maintenance.run_once();
    if report.orphaned > 0 {
        info!("Recovered {} orphaned jobs from a previous run", report.orphaned);
    }
    maintenance.start();

    // Start workers
    let workers = WorkerPool::new(Arc::clone(&manager), config.queue.clone());
    workers.start();
    info!("Worker pool started");

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&manager)));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    // Requeue running jobs so the next process picks them up
    info!("Server shutting down...");
    workers.stop().await;
    maintenance.stop().await;
    info!("Background workers stopped");

    served
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
