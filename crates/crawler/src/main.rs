//! appscout crawler entry point.
//!
//! Loads configuration, restores the snapshot store, runs the crawl and dumps
//! the store when the crawl ends or a termination signal arrives. Logs go to
//! stderr as JSON lines.

use std::sync::Arc;

use anyhow::{Context, Result};
use appscout_client::{ApiClient, ApiConfig, ClickhouseConfig, ClickhouseRepository};
use appscout_core::{
    AppConfig, AppDb, CrawlSettings, Crawler, DatabaseBackend, FileLines, LoadOptions, Repository, SnapshotStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;

    let options = LoadOptions { fresh_start: config.fresh_start, require_existing: config.require_snapshot };
    let store = Arc::new(SnapshotStore::open(&config.cache_path, options).context("opening snapshot store")?);
    tracing::info!(path = %config.cache_path.display(), entries = store.len(), "snapshot store ready");

    let source = Arc::new(ApiClient::new(ApiConfig::from_app_config(&config)?)?);
    let repository = open_repository(&config).await?;

    let crawler = Arc::new(Crawler::new(
        store.clone(),
        source,
        repository,
        Arc::new(FileLines),
        CrawlSettings::from(&config),
    ));

    let mut run = tokio::spawn({
        let crawler = crawler.clone();
        let seed_path = config.seed_path.clone();
        async move { crawler.scrap(&seed_path).await }
    });

    let outcome = tokio::select! {
        joined = &mut run => joined,
        _ = shutdown_signal() => {
            tracing::info!("termination signal received, stopping crawl");
            spawn_force_quit(store.clone());
            crawler.stop().await;
            run.await
        }
    };

    let dumped = store.dump().context("writing snapshot")?;
    tracing::info!(written = dumped, path = %config.cache_path.display(), "snapshot flushed");

    let summary = outcome.context("crawl task panicked")??;
    tracing::info!(
        fetched = summary.fetched,
        persisted = summary.persisted,
        failed_batches = summary.failed_batches,
        keywords_queued = summary.keywords_queued,
        errors = summary.errors,
        "appscout finished"
    );

    Ok(())
}

async fn open_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    match config.database.backend {
        DatabaseBackend::Sqlite => {
            let db = AppDb::open(&config.database.path).await.context("opening sqlite database")?;
            tracing::info!(path = %config.database.path.display(), "using sqlite repository");
            Ok(Arc::new(db))
        }
        DatabaseBackend::Clickhouse => {
            let repo = ClickhouseRepository::new(ClickhouseConfig::from(config))?;
            repo.init_schema().await.context("creating clickhouse table")?;
            tracing::info!(url = %config.database.url, table = %config.database.table, "using clickhouse repository");
            Ok(Arc::new(repo))
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// A second signal during shutdown skips the drain: dump and exit.
fn spawn_force_quit(store: Arc<SnapshotStore>) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("second signal received, exiting without draining");
        if let Err(e) = store.dump() {
            tracing::error!(error = %e, "failed to write snapshot");
        }
        std::process::exit(130);
    });
}
