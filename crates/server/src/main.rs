use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedsync_core::{
    create_authenticator, create_notifier, create_remote_client, load_config, validate_config,
    AcquisitionMonitor, Authenticator, CallPolicy, JobLocks, JobService, JobStore,
    NotificationDispatcher, NotificationOutbox, NotificationSweep, ReportLog, RetentionSweep,
    Scheduler, SqliteJobStore, SqliteOutbox, SqliteReportLog, SyncBridge, TaskSchedule,
};
use seedsync_server::api::create_router;
use seedsync_server::state::AppState;

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
    // SEEDSYNC_LOG_FORMAT=json for line-delimited JSON logs
    let json_logs = matches!(std::env::var("SEEDSYNC_LOG_FORMAT").as_deref(), Ok("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let config_path = std::env::var("SEEDSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded, auth method {:?}, database {:?}",
        config.auth.method,
        config.database.path
    );

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    let db_path = &config.database.path;
    let store: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::new(db_path).context("Failed to open job store")?);
    let outbox: Arc<dyn NotificationOutbox> =
        Arc::new(SqliteOutbox::new(db_path).context("Failed to open notification outbox")?);
    let reports: Arc<dyn ReportLog> =
        Arc::new(SqliteReportLog::new(db_path).context("Failed to open report log")?);
    info!("Stores initialized");

    let notifier =
        create_notifier(&config.notifier).context("Failed to create notifier")?;
    if let Some(notifier) = &notifier {
        info!("Notifications via {}", notifier.name());
    }

    let locks = JobLocks::new();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&outbox),
        Arc::clone(&store),
        notifier,
        locks.clone(),
    ));
    let bridge = Arc::new(SyncBridge::new(
        Arc::clone(&store),
        Arc::clone(&reports),
        Arc::clone(&dispatcher),
        locks.clone(),
        config.sync.clone(),
    ));

    let mut scheduler = Scheduler::new();
    scheduler.add(
        Arc::new(NotificationSweep::new(
            Arc::clone(&dispatcher),
            Duration::from_secs(config.notifier.sending_lease_secs),
        )),
        TaskSchedule::from_secs(
            config.notifier.retry_interval_secs,
            config.notifier.sending_lease_secs,
        ),
    );

    let jobs = match &config.torrent_client {
        Some(client_config) => {
            let client =
                create_remote_client(client_config).context("Failed to create torrent client")?;
            info!(
                "Torrent client: {} at {}",
                client_config.backend.as_str(),
                client_config.active_url().unwrap_or("<unset>")
            );
            let service = Arc::new(JobService::new(
                Arc::clone(&store),
                client,
                Arc::clone(&dispatcher),
                locks.clone(),
                CallPolicy::from(&client_config.calls),
            ));

            scheduler.add(
                Arc::new(AcquisitionMonitor::new(
                    Arc::clone(&service),
                    config.monitor.missing_threshold,
                )),
                TaskSchedule::from_secs(
                    config.monitor.interval_secs,
                    config.monitor.tick_deadline_secs,
                ),
            );
            scheduler.add(
                Arc::new(RetentionSweep::new(
                    Arc::clone(&service),
                    Arc::clone(&outbox),
                    Arc::clone(&reports),
                    config.retention.retention_days,
                    config.retention.delete_data,
                )),
                TaskSchedule::from_secs(
                    config.retention.interval_secs,
                    config.retention.tick_deadline_secs,
                ),
            );
            Some(service)
        }
        None => {
            warn!("No torrent client configured; job intake and monitoring are disabled");
            None
        }
    };

    scheduler.start();

    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        store,
        bridge,
        jobs,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down, stopping periodic tasks...");
    scheduler.stop().await;
    info!("Periodic tasks stopped");

    Ok(())
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
}
