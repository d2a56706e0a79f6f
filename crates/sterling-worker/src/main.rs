//! Sterling worker daemon.
//!
//! Wires the environment together and runs the outbox driver until SIGINT:
//! database pool and migrations, the filesystem document store, the DocuPipe
//! client, and the two queue processors (document pipeline and analytics
//! rebuild). All delivery logic lives in `sterling-pipeline`; this binary
//! only configures, starts and stops it.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sterling_core::defaults::{QUEUE_ANALYTICS_REBUILD, QUEUE_DOCUMENT_PROCESSING};
use sterling_core::{OutboxRepository, PipelineJobRepository};
use sterling_db::{log_pool_metrics, Database, FilesystemStore};
use sterling_docupipe::{DocupipeClient, Standardizer};
use sterling_pipeline::{
    AnalyticsEngine, AnalyticsProcessor, DocumentProcessor, DriverConfig, OutboxDriver, Stores,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "sterling_worker=debug,sterling_pipeline=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sterling_worker=debug,sterling_pipeline=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sterling-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/sterling".to_string());
    let storage_path = std::env::var("STERLING_STORAGE_PATH")
        .unwrap_or_else(|_| "/var/lib/sterling/documents".to_string());
    let driver_config = DriverConfig::from_env();
    // One claim-age knob governs both stale sweeps: the driver's outbox
    // sweep and this binary's pipeline sweep.
    let claim_timeout_secs = driver_config.claim_timeout_secs;
    let reclaim_interval = Duration::from_millis(driver_config.reclaim_interval_ms);

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Database connected");

    // Run pending database migrations on startup
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Initialize document storage
    let storage = FilesystemStore::new(&storage_path);
    if let Err(reason) = storage.validate().await {
        anyhow::bail!("document storage at {storage_path} failed validation: {reason}");
    }
    info!("Document storage initialized at {}", storage_path);

    // Standardization backend
    let standardizer: Arc<dyn Standardizer> = Arc::new(DocupipeClient::from_env()?);

    // Wire the shared store handles. `Database` owns one repository per
    // entity; the pipeline reaches them through trait objects.
    let repos = db.clone();
    let stores = Stores {
        outbox: Arc::new(repos.outbox),
        pipeline: Arc::new(repos.pipeline_jobs),
        insights: Arc::new(repos.insights),
        accounts: Arc::new(repos.accounts),
        overrides: Arc::new(repos.overrides),
        snapshots: Arc::new(repos.snapshots),
        dead_letters: Arc::new(repos.dead_letters),
        storage: Arc::new(storage),
    };

    // Create and start the outbox driver
    let driver_handle = if driver_config.enabled {
        info!("Starting outbox driver...");
        let engine = Arc::new(AnalyticsEngine::new(
            stores.insights.clone(),
            stores.overrides.clone(),
            stores.snapshots.clone(),
        ));
        let driver = OutboxDriver::new(stores.outbox.clone(), driver_config);
        driver
            .register_processor(
                QUEUE_DOCUMENT_PROCESSING,
                Arc::new(DocumentProcessor::new(stores.clone(), standardizer)),
            )
            .await;
        driver
            .register_processor(
                QUEUE_ANALYTICS_REBUILD,
                Arc::new(AnalyticsProcessor::new(engine)),
            )
            .await;

        let handle = driver.start();
        info!("Outbox driver started");

        // The driver sweeps its own stale outbox claims; abandoned document
        // runs need this separate sweep because a reclaimed pipeline job has
        // no pending trigger left to redeliver it.
        let sweep_pipeline = stores.pipeline.clone();
        let sweep_outbox = stores.outbox.clone();
        tokio::spawn(async move {
            reclaim_abandoned_documents(
                sweep_pipeline,
                sweep_outbox,
                reclaim_interval,
                claim_timeout_secs,
            )
            .await;
        });

        // Periodic queue depth and pool health logging
        let health_outbox = stores.outbox.clone();
        let health_pool = db.pool.clone();
        tokio::spawn(async move {
            report_queue_health(health_outbox, health_pool).await;
        });

        Some(handle)
    } else {
        info!("Outbox driver disabled");
        None
    };

    info!("Sterling worker running, send SIGINT to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping driver...");

    if let Some(handle) = driver_handle {
        handle.shutdown().await?;
    }
    info!("Sterling worker stopped");
    Ok(())
}

/// Return abandoned document runs to the claimable pool and nudge the
/// processing queue so the next drain picks them up.
async fn reclaim_abandoned_documents(
    pipeline: Arc<dyn PipelineJobRepository>,
    outbox: Arc<dyn OutboxRepository>,
    interval: Duration,
    older_than_secs: i64,
) {
    // The first tick fires immediately, recovering runs orphaned by a
    // previous crash as soon as the worker restarts.
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        match pipeline.reclaim_stale(older_than_secs).await {
            Ok(0) => {}
            Ok(reclaimed) => {
                warn!(reclaimed, "returned abandoned document runs to the queue");
                let nudge = outbox
                    .enqueue_deduplicated(
                        QUEUE_DOCUMENT_PROCESSING,
                        serde_json::json!({ "document_id": null }),
                        "reclaim-nudge",
                    )
                    .await;
                if let Err(e) = nudge {
                    warn!(error = %e, "failed to enqueue reclaim nudge");
                }
            }
            Err(e) => warn!(error = %e, "pipeline stale-claim sweep failed"),
        }
    }
}

/// Periodically log per-queue delivery counters and pool health.
async fn report_queue_health(outbox: Arc<dyn OutboxRepository>, pool: PgPool) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        log_pool_metrics(&pool);
        match outbox.queue_stats().await {
            Ok(stats) => {
                for s in stats {
                    debug!(
                        queue = %s.queue,
                        pending = s.pending,
                        processing = s.processing,
                        completed = s.completed,
                        failed = s.failed,
                        "queue depth"
                    );
                }
            }
            Err(e) => warn!(error = %e, "queue stats unavailable"),
        }
    }
}
