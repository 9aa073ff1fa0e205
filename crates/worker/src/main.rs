use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partsync_core::config::SyncConfig;
use partsync_events::EventBus;
use partsync_inventory::InventoryClient;
use partsync_sync::{
    ImportRunner, ImportScheduler, ImportService, ImportWorker, PartCounterRefresher,
    PgCatalogStore, RunQueue,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partsync_worker=debug,partsync_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Arc::new(SyncConfig::from_env().expect("Invalid sync configuration"));
    tracing::info!(
        api_base_url = %config.api_base_url,
        company_id = config.company_id,
        channel = %config.channel,
        page_size = config.page_size,
        api_key_configured = config.api_key.is_some(),
        "Loaded sync configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = partsync_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    partsync_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    partsync_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let event_bus = Arc::new(EventBus::default());
    let store = Arc::new(PgCatalogStore::new(pool.clone()));
    let source = Arc::new(
        InventoryClient::new(Arc::clone(&config)).expect("Failed to build inventory client"),
    );

    let (queue, receiver) = RunQueue::channel();
    let runner = Arc::new(ImportRunner::new(
        store.clone(),
        source,
        Arc::clone(&config),
        Arc::clone(&event_bus),
    ));
    let service = Arc::new(ImportService::new(store.clone(), queue));
    let scheduler = ImportScheduler::new(
        store.clone(),
        Arc::clone(&service),
        config.scheduler_poll_interval,
    );
    let refresher = PartCounterRefresher::new(store.clone(), Arc::clone(&event_bus));

    let cancel = CancellationToken::new();

    // Subscribe before any run can publish.
    let counters_handle = tokio::spawn({
        let receiver = event_bus.subscribe();
        let cancel = cancel.clone();
        async move { refresher.run(receiver, cancel).await }
    });
    let worker_handle = tokio::spawn(ImportWorker::new(runner, receiver).run(cancel.clone()));
    tracing::info!("Import worker spawned");

    match scheduler.seed_defaults().await {
        Ok(created) => tracing::info!(created, "Import schedules checked"),
        Err(e) => tracing::error!(error = %e, "Failed to seed import schedules"),
    }

    match service.recover_interrupted_runs().await {
        Ok(0) => tracing::info!("No interrupted import runs"),
        Ok(recovered) => tracing::info!(recovered, "Re-queued interrupted import runs"),
        Err(e) => tracing::error!(error = %e, "Failed to recover interrupted import runs"),
    }

    let scheduler_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    tracing::info!("Import scheduler stopped");

    // In-flight runs stop at the next batch boundary and stay in_progress
    // for recovery on the next start.
    let _ = tokio::time::timeout(Duration::from_secs(30), worker_handle).await;
    tracing::info!("Import worker stopped");

    let _ = tokio::time::timeout(Duration::from_secs(5), counters_handle).await;
    tracing::info!("Part counter refresher stopped");

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
