//! Composition root for the wallcat reconciliation service.
//!
//! Wires configuration, the upload repository, the S3 blob store, and the
//! JetStream publisher into the reconciler, starts the scheduler, and runs
//! until SIGINT/SIGTERM.

mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use wallcat_core::Config;
use wallcat_db::UploadRepository;
use wallcat_events::{EventPublisher, JetStreamPublisher};
use wallcat_reconcile::{Reconciler, Scheduler};
use wallcat_storage::{BlobStore, S3BlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    wallcat_db::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let region = config
        .region()
        .context("S3_REGION or AWS_REGION must be set")?
        .to_string();
    let blobs: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(config.s3_bucket.clone(), region, config.s3_endpoint.clone())
            .await
            .context("Failed to create blob store")?,
    );

    let events: Arc<dyn EventPublisher> = Arc::new(
        JetStreamPublisher::connect(&config.nats_url)
            .await
            .context("Failed to connect to event channel")?,
    );

    let uploads = UploadRepository::new(pool.clone());
    let reconciler = Arc::new(Reconciler::new(
        uploads,
        blobs,
        events,
        config.s3_bucket.clone(),
        config.reconcile.clone(),
    ));

    let scheduler = Scheduler::new(reconciler, config.schedule.clone());
    scheduler.start();

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    pool.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
