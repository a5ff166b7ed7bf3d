//! Ingest Worker Service
//!
//! Consumes telemetry jobs from the Redis priority queues and runs them
//! through the telemetry processors.
//!
//! ## Architecture
//!
//! ```text
//! Redis lists ({high,medium,low}:{job_type})
//!   ↓ BRPOP, highest priority first
//! WorkerPool (WORKER_COUNT workers)
//!   ↓
//! enrich_trace | store_raw | analytics_export
//!   ↓ store_raw only
//! PostgreSQL
//! ```
//!
//! ## Features
//!
//! - Retry with `attempts²` second back-off through the delayed set
//! - Dead-letter list for jobs that exhaust their attempts
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Health, queue stats and Prometheus metrics on `HEALTH_PORT`

use axum::Router;
use core_config::{
    DatabaseConfig, Environment, FromEnv, RateLimitSettings, RedisConfig, WorkerSettings,
};
use domain_telemetry::{PgTelemetryStore, default_registry};
use eyre::{Result, WrapErr};
use job_queue::{
    AdminState, QueueClient, RateLimitConfig, RateLimiter, RedisStore, RetryPolicy, WorkerConfig,
    WorkerPool, admin_router, init_metrics,
};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

async fn start_admin_server(state: AdminState, port: u16) -> Result<()> {
    let app: Router = admin_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind admin server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Admin server failed")?;

    Ok(())
}

/// Run the ingest worker until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if configuration is invalid or PostgreSQL or Redis
/// cannot be reached at startup.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    init_metrics();

    info!(
        name = APP_NAME,
        version = APP_VERSION,
        environment = ?environment,
        "Starting ingest worker"
    );

    let worker_settings =
        WorkerSettings::from_env().wrap_err("Failed to load worker configuration")?;
    let rate_limits =
        RateLimitSettings::from_env().wrap_err("Failed to load rate limit configuration")?;
    let db_config = DatabaseConfig::from_env().wrap_err("Failed to load database configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to PostgreSQL...");
    let mut options = ConnectOptions::new(db_config.url.clone());
    options.max_connections(db_config.max_connections);
    let db = Database::connect(options)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");

    info!("Connecting to Redis...");
    let redis = RedisStore::connect_with_retry(&redis_config.url, RetryPolicy::default())
        .await
        .wrap_err("Failed to connect to Redis")?;
    let redis = Arc::new(redis);
    info!("Connected to Redis");

    let client = QueueClient::new(redis.clone());
    let registry = default_registry(Arc::new(PgTelemetryStore::new(db)))
        .wrap_err("Failed to register job processors")?;

    let config = WorkerConfig::default()
        .with_dequeue_timeout(worker_settings.dequeue_timeout)
        .with_sweep_interval(worker_settings.sweep_interval);
    info!(
        worker_count = worker_settings.worker_count,
        dequeue_timeout = ?config.dequeue_timeout,
        sweep_interval = ?config.sweep_interval,
        "Worker configuration loaded"
    );

    let pool = Arc::new(WorkerPool::new(
        client.clone(),
        Arc::new(registry),
        worker_settings.worker_count,
        config,
    ));

    let limiter = RateLimiter::new(
        redis,
        RateLimitConfig {
            per_minute: rate_limits.per_minute,
            per_hour: rate_limits.per_hour,
        },
    );
    let admin_state = AdminState::new(client, APP_NAME, APP_VERSION)
        .with_pool(pool.clone())
        .with_rate_limiter(limiter, environment.is_development());

    let health_port = worker_settings.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_admin_server(admin_state, health_port).await {
            error!(error = %e, "Admin server failed");
        }
    });

    let shutdown = CancellationToken::new();
    pool.start(&shutdown);

    shutdown_signal().await;

    shutdown.cancel();
    pool.stop().await;

    info!("Ingest worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
