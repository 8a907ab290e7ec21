//! Carebase API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use carebase_api::config::AppConfig;
use carebase_api::error::AppError;
use carebase_api::state::AppState;
use carebase_api::{app, telemetry};
use carebase_broker::RedisBroker;
use carebase_core::broker::Broker;
use carebase_core::clock::{Clock, SystemClock};
use carebase_core::metrics::MetricsRecorder;
use carebase_core::store::{AuditLogStore, OutboxStore};
use carebase_outbox_store::MIGRATOR;
use carebase_outbox_store::pg_audit_log_store::PgAuditLogStore;
use carebase_outbox_store::pg_outbox_store::PgOutboxStore;
use carebase_outbox_worker::processor::OutboxProcessor;
use carebase_outbox_worker::sweep::{AuditLogSweep, PeriodicSweeper, ProcessedEventSweep};
use carebase_outbox_worker::telemetry::OtelMetricsRecorder;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!("Starting Carebase API server");

    let result = serve(config).await;
    if let Err(e) = &result {
        error!(error = %e, "server exited with error");
    }

    telemetry.shutdown();
    result
}

async fn serve(config: AppConfig) -> Result<(), AppError> {
    // Database pool and schema.
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.redis_url).await?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let outbox_store: Arc<dyn OutboxStore> = Arc::new(PgOutboxStore::new(pool.clone()));
    let audit_log: Arc<dyn AuditLogStore> = Arc::new(PgAuditLogStore::new(pool.clone()));
    let metrics: Arc<dyn MetricsRecorder> = Arc::new(OtelMetricsRecorder::new(
        &opentelemetry::global::meter("carebase-outbox"),
    ));

    // Background workers.
    let cancel = CancellationToken::new();
    let processor = Arc::new(OutboxProcessor::new(
        config.worker,
        Arc::clone(&outbox_store),
        broker,
        Arc::clone(&metrics),
        Arc::clone(&clock),
    )?);
    let outbox_sweeper = Arc::new(PeriodicSweeper::new(
        Arc::new(ProcessedEventSweep::new(Arc::clone(&outbox_store))),
        config.outbox_retention,
        Arc::clone(&clock),
        Arc::clone(&metrics),
    )?);
    let audit_sweeper = Arc::new(PeriodicSweeper::new(
        Arc::new(AuditLogSweep::new(Arc::clone(&audit_log))),
        config.audit_retention,
        Arc::clone(&clock),
        Arc::clone(&metrics),
    )?);
    let workers = vec![
        processor.spawn(cancel.clone()),
        outbox_sweeper.spawn(cancel.clone()),
        audit_sweeper.spawn(cancel.clone()),
    ];

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let router = app(AppState::new(clock, outbox_store, audit_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Server(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    // Stop the workers even if the server failed on its own.
    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "background worker panicked");
        }
    }

    served?;
    Ok(())
}
