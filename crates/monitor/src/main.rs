//! `nh3-monitor` -- ammonia gas sensor monitoring daemon.
//!
//! Polls every configured sensor on a fixed interval, stores readings in
//! SQLite, raises threshold alerts through email and WhatsApp, and prunes
//! old history.
//!
//! # Environment variables
//!
//! | Variable     | Required | Default              | Description                       |
//! |--------------|----------|----------------------|-----------------------------------|
//! | `NH3_CONFIG` | no       | `config/config.json` | JSON configuration file           |
//! | `RUST_LOG`   | no       | `nh3_monitor=info,nh3_events=info` | Log filter          |
//! | `LOG_FORMAT` | no       | --                   | `json` for structured log lines   |
//!
//! Further overrides are documented on `MonitorConfig::apply_env`.

use std::sync::Arc;
use std::time::Duration;

use nh3_core::alert::{AlertGate, AlertRegistry};
use nh3_core::config::{ConfigError, MonitorConfig};
use nh3_core::error::CoreError;
use nh3_db::repositories::SensorRepo;
use nh3_events::{alert_queue, EventBus, NotificationDispatcher, ALERT_QUEUE_CAPACITY};
use nh3_monitor::store::{ReadingStore, SqliteReadingStore, StoreWriter};
use nh3_monitor::transport::{SimulatedTransport, Transport};
use nh3_monitor::{retention, AcquisitionCycle, Monitor, MonitorError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each background task gets to finish after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nh3_monitor=info,nh3_events=info".into()),
    );
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = run().await {
        tracing::error!(error = %e, fatal = e.is_fatal(), "Monitor failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MonitorError> {
    // --- Configuration ---
    let path = MonitorConfig::path_from_env();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Config file not found, using factory defaults");
    }
    let mut config = MonitorConfig::load_or_default(&path)?;
    config.apply_env()?;
    let registry = config.validate()?;
    tracing::info!(
        path = %path.display(),
        sensors = registry.len(),
        scan_interval_ms = config.modbus.scan_interval_ms,
        cooldown_minutes = config.alerts.cooldown_minutes,
        retention_days = config.database.retention_days,
        "Loaded configuration"
    );

    if !config.modbus.simulate {
        return Err(ConfigError::Invalid(CoreError::Validation(format!(
            "no field bus driver is built in for {} at {} baud; set modbus.simulate = true",
            config.modbus.port, config.modbus.baudrate
        )))
        .into());
    }

    // --- Database ---
    let pool = nh3_db::create_pool(&config.database.url)
        .await
        .map_err(MonitorError::DatabaseUnavailable)?;
    nh3_db::run_migrations(&pool).await?;
    nh3_db::health_check(&pool)
        .await
        .map_err(MonitorError::DatabaseUnavailable)?;
    let changed = SensorRepo::sync(&pool, registry.all())
        .await
        .map_err(MonitorError::DatabaseUnavailable)?;
    tracing::info!(url = %config.database.url, sensors_changed = changed, "Database ready");

    // --- Transport ---
    let transport: Box<dyn Transport> = Box::new(SimulatedTransport::new());
    tracing::info!("Using simulated transport");

    // --- Event bus and notifications ---
    let bus = Arc::new(EventBus::default());
    // Acquisition and retention stop first; delivery and status follow once
    // the last tick's alerts and events are out.
    let cancel = CancellationToken::new();
    let downstream_cancel = CancellationToken::new();

    let dispatcher = NotificationDispatcher::from_settings(
        pool.clone(),
        Arc::clone(&bus),
        config.alerts.enabled,
        &config.notifications,
    );
    let (alerts, alert_rx) = alert_queue(ALERT_QUEUE_CAPACITY);
    let dispatcher_handle = tokio::spawn(dispatcher.run(alert_rx, downstream_cancel.clone()));

    // --- Storage ---
    let store: Arc<dyn ReadingStore> = Arc::new(SqliteReadingStore::new(pool.clone()));
    let (writer, writer_handle) = StoreWriter::spawn(Arc::clone(&store), Arc::clone(&bus));
    let retention_handle = tokio::spawn(retention::run(
        store,
        config.database.retention_days,
        config.prune_interval(),
        cancel.clone(),
    ));

    // --- Acquisition ---
    let cycle = AcquisitionCycle::new(
        transport,
        config.read_timeout(),
        config.modbus.retries,
        AlertRegistry::new(AlertGate::new(config.cooldown())),
    );
    let monitor = Monitor::new(cycle, registry, Arc::clone(&bus), writer, config.scan_interval())
        .with_notifications(alerts);

    let status = monitor.status_board();
    let status_rx = bus.subscribe();
    let status_cancel = downstream_cancel.clone();
    let status_handle = tokio::spawn(async move { status.run(status_rx, status_cancel).await });

    let monitor_handle = tokio::spawn(monitor.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    // The in-flight tick finishes first; dropping the monitor closes the
    // writer and alert queues, which then drain.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, monitor_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, retention_handle).await;
    downstream_cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, dispatcher_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, status_handle).await;

    pool.close().await;
    tracing::info!("Monitor shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
