//! Coral music server.
//!
//! Wires the scan pipeline to Postgres, registers the configured libraries,
//! watches every library root for changes and runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coral_config::{Config, ScannerConfig, ScannerConfigSource};
use coral_core::database::{PostgresLibraryStore, library_schema};
use coral_core::scan::orchestration::{
    EmbeddingBackend, HttpEmbeddingBackend, InMemoryScanReporter, NoopEmbeddingBackend,
};
use coral_core::scan::{FsWatchService, Indexer, IndexerDeps, LoftyTagDecoder, ScanRuntime};
use coral_core::services::{FsArtworkService, KeywordSearchService};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the watcher registry is reconciled with the stored libraries.
const LIBRARY_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coral_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (scanner, source) =
        ScannerConfig::load_from_env().context("failed to load scanner configuration")?;
    match &source {
        ScannerConfigSource::Default => info!("scanner config defaults in effect"),
        ScannerConfigSource::EnvPath(path) | ScannerConfigSource::File(path) => {
            info!(path = %path.display(), "scanner config loaded from file")
        }
        ScannerConfigSource::EnvInline => info!("scanner config loaded from inline json"),
    }
    let scan_config = scanner.scan;
    info!(
        scanner.debounce_secs = scan_config.watch.debounce_secs,
        scanner.embedding_concurrency = scan_config.embedding.max_concurrency,
        scanner.entity_batch_size = scan_config.bulk.entity_batch_size,
        scanner.interval_minutes = scan_config.schedule.interval_minutes,
        "scanner configuration in effect"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = Arc::new(PostgresLibraryStore::new(pool));
    store
        .migrate()
        .await
        .context("database migration failed")?;
    info!("database migrations applied");

    tokio::fs::create_dir_all(&config.artwork_dir)
        .await
        .with_context(|| format!("failed to create {}", config.artwork_dir.display()))?;

    let decoder = Arc::new(LoftyTagDecoder);
    let deps = IndexerDeps {
        repository: store.clone(),
        entity_store: store.clone(),
        schema: Arc::new(library_schema()),
        decoder: decoder.clone(),
        artwork: Arc::new(FsArtworkService::new(&config.artwork_dir, decoder)),
        search: Arc::new(KeywordSearchService::new(store.clone())),
    };
    let indexer = Indexer::new(deps, scan_config.indexer);

    let backend: Arc<dyn EmbeddingBackend> = match &config.embedding_url {
        Some(url) => {
            info!(url = %url, "embedding service configured");
            Arc::new(HttpEmbeddingBackend::new(url, store.clone())?)
        }
        None => {
            warn!("CORAL_EMBEDDING_URL not set, embeddings disabled");
            Arc::new(NoopEmbeddingBackend)
        }
    };

    let runtime = ScanRuntime::start(
        &scan_config,
        indexer,
        Arc::new(InMemoryScanReporter::default()),
        backend,
    );

    for root in &config.libraries {
        match runtime.service().add_library(root).await {
            Ok(library) => info!(library = %library.id, path = %root.display(), "library ready"),
            Err(err) => error!(path = %root.display(), error = %err, "failed to add library"),
        }
    }

    let watchers = Arc::new(FsWatchService::new(
        scan_config.watch.clone(),
        runtime.queue(),
    ));
    watchers
        .sync_libraries(store.as_ref())
        .await
        .context("failed to start library watchers")?;

    let sync_task = tokio::spawn(sync_watchers(
        Arc::clone(&watchers),
        store.clone(),
        runtime.shutdown_token(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    runtime.shutdown().await;
    if let Err(err) = sync_task.await {
        warn!(error = %err, "library sync task ended abnormally");
    }
    watchers.shutdown().await;
    info!("coral server stopped");
    Ok(())
}

/// Keep one watcher per stored library until `cancel` fires.
async fn sync_watchers(
    watchers: Arc<FsWatchService>,
    store: Arc<PostgresLibraryStore>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(LIBRARY_SYNC_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = watchers.sync_libraries(store.as_ref()).await {
                    warn!(error = %err, "failed to refresh library watchers");
                }
            }
        }
    }
}
