use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dropwatch_core::{
    config_hash, create_activity_system, create_authenticator, load_config, validate_config,
    AcquisitionAction, ActivityEvent, ActivityStore, Authenticator, AvailabilityFeed, Config,
    CycleOrchestrator, EventBroadcaster, FeedSource, FileAvailabilityFeed, JsonFilePersistence,
    LogFormat, MemoryActivityStore, MemoryPersistence, OrchestratorDeps, SimulatedAcquisition,
    SimulatedTeardown, SqlitePersistence, StatePersistence, StateStore, StaticAvailabilityFeed,
    StorageBackend, TeardownAction, CONFIG_PATH_ENV,
};
use dropwatch_server::api::create_router;
use dropwatch_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the activity event channel
const ACTIVITY_BUFFER_SIZE: usize = 1000;

/// Activity records kept in memory
const ACTIVITY_CAPACITY: usize = 10_000;

/// How long to wait for queued activity events at shutdown
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

fn open_state_store(config: &Config) -> Result<StateStore> {
    let path = &config.storage.path;
    let persistence: Arc<dyn StatePersistence> = match config.storage.backend {
        StorageBackend::Json => Arc::new(JsonFilePersistence::new(path)),
        StorageBackend::Sqlite => Arc::new(
            SqlitePersistence::new(path)
                .with_context(|| format!("Failed to open state database {:?}", path))?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory state storage; nothing survives a restart");
            Arc::new(MemoryPersistence::new())
        }
    };

    StateStore::open(persistence).with_context(|| format!("Failed to load item state from {:?}", path))
}

fn create_feed(config: &Config) -> Arc<dyn AvailabilityFeed> {
    match config.feed.source {
        FeedSource::File => {
            info!("Reading availability from {:?}", config.feed.path);
            Arc::new(FileAvailabilityFeed::new(&config.feed.path))
        }
        FeedSource::Static => {
            info!(
                available = config.feed.available.len(),
                "Using static availability feed"
            );
            Arc::new(StaticAvailabilityFeed::from_lists(
                config.items.iter().map(|item| item.id.as_str()),
                &config.feed.available,
            ))
        }
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // The log format lives in the config, so load it first.
    let loaded = load_config(&config_path);
    init_logging(
        loaded
            .as_ref()
            .map(|c| c.logging.format)
            .unwrap_or_default(),
    );

    info!("Loading configuration from {:?}", config_path);
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {}", config.auth.method.as_str());
    info!(
        "Tracking {} items, storage: {:?} at {:?}",
        config.items.len(),
        config.storage.backend,
        config.storage.path
    );

    let config_hash = config_hash(&config);

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!(method = authenticator.method().as_str(), "Control API authentication configured");

    // Create activity system
    let activity_store: Arc<dyn ActivityStore> =
        Arc::new(MemoryActivityStore::new(ACTIVITY_CAPACITY));
    let (activity_handle, activity_writer) =
        create_activity_system(Arc::clone(&activity_store), ACTIVITY_BUFFER_SIZE);
    let writer_handle = tokio::spawn(activity_writer.run());

    activity_handle
        .emit(ActivityEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash.clone(),
        })
        .await;
    info!("Emitted ServiceStarted activity event");

    // Collaborators
    let store = Arc::new(open_state_store(&config)?);
    info!("State store initialized ({})", store.backend_name());

    let feed = create_feed(&config);
    let action: Arc<dyn AcquisitionAction> =
        Arc::new(SimulatedAcquisition::new(config.simulation.clone()));
    let teardown: Arc<dyn TeardownAction> =
        Arc::new(SimulatedTeardown::new(config.simulation.clone()));
    info!(
        success_rate = config.simulation.success_rate,
        "Using simulated checkout"
    );

    // Create orchestrator
    let orchestrator = Arc::new(CycleOrchestrator::new(
        config.cycle_settings(),
        OrchestratorDeps {
            store,
            feed,
            action,
            teardown,
            broadcaster: EventBroadcaster::new(config.orchestrator.subscriber_buffer),
            activity: Some(activity_handle.clone()),
        },
    ));

    if config.orchestrator.auto_start {
        orchestrator.start();
        info!("Cycle orchestrator started");
    } else {
        info!("Cycle orchestrator not auto-started; POST /api/v1/orchestrator/start to run it");
    }

    // Create app state
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        Some(config_path),
        authenticator,
        activity_handle.clone(),
        activity_store,
        Arc::clone(&orchestrator),
    ));

    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop().await;

    info!("Server shutting down...");
    activity_handle
        .emit(ActivityEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Emit the final event before dropping the handles so the writer drains it.
    drop(orchestrator);
    drop(activity_handle);

    // Workers cut loose by a forced drain may still hold a handle.
    if tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer_handle)
        .await
        .is_err()
    {
        warn!("Activity writer did not finish in time");
    } else {
        info!("Activity writer stopped");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
