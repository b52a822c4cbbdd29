use backup_orchestrator::config::AppConfig;
use backup_orchestrator::db::connection::create_pool;
use backup_orchestrator::db::migrate::migrate;
use backup_orchestrator::state::AppState;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!(
        database = %config.database.production,
        backups_dir = %config.backups_dir.display(),
        "Starting backup orchestrator"
    );

    std::fs::create_dir_all(&config.backups_dir)?;

    // Initialize catalog
    let pool = create_pool(&config.catalog_db_path)?;
    migrate(&pool)?;

    let state = AppState::new(pool, config);

    // Initialize cron scheduler
    let scheduler = state.scheduler().await?;
    scheduler.start().await?;
    tracing::info!(
        hour = state.config.schedule_hour,
        minute = state.config.schedule_minute,
        "Daily backup scheduler running"
    );

    shutdown_signal().await;

    // Let an in-flight scheduled backup finish before exiting
    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    tracing::info!("Backup orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
