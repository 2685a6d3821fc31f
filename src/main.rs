//! city_events - event admission and review aggregate service
//!
//! Serves the HTTP API, runs the notification worker and the aggregate
//! reconciliation job, and shuts all three down together.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use city_events::api::{self, AppState};
use city_events::config::StoreBackend;
use city_events::db;
use city_events::jobs::{JobScheduler, JobSchedulerConfig};
use city_events::notifications::{LogSink, NotificationDispatcher, NotificationWorker};
use city_events::store::{InMemoryStore, PgStore, Repository};
use city_events::Config;

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "city_events=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the repository for the configured backend
async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn Repository>, Option<PgPool>)> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; all data is lost on shutdown");
            let repo: Arc<dyn Repository> = Arc::new(InMemoryStore::new());
            Ok((repo, None))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(url, config.database_max_connections).await?;
            db::verify_connection(&pool).await?;

            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            let repo: Arc<dyn Repository> = Arc::new(PgStore::new(pool.clone()));
            Ok((repo, Some(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_json);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(
        environment = %config.environment,
        backend = ?config.store_backend,
        "Starting city_events server"
    );

    let (repo, pool) = open_store(&config).await?;
    tracing::info!(
        capability = ?repo.transaction_capability(),
        "Store transaction capability detected"
    );

    // Background workers
    let (notifier, notifications_rx) =
        NotificationDispatcher::channel(config.notification_queue_capacity);
    let notification_worker = NotificationWorker::new(notifications_rx, LogSink).start();

    let state = AppState::new(
        repo,
        notifier,
        config.admission,
        config.consistency,
        config.auto_approve_reviews,
    );
    let scheduler = JobScheduler::with_config(
        state.consistency.clone(),
        JobSchedulerConfig {
            reconcile_interval: config.reconcile_interval,
        },
    )
    .start();

    let app = api::build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: the router (and every dispatcher clone) is gone now, so the
    // notification worker drains its queue and exits.
    tracing::info!("Server shutting down...");
    scheduler.stop().await;
    match notification_worker.await {
        Ok(delivered) => tracing::info!(delivered, "Notification worker drained"),
        Err(e) => tracing::error!(error = %e, "Notification worker panicked"),
    }

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed.");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
