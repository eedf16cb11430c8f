//! Crawl orchestration.
//!
//! A run feeds the seed list through the fetch path while two workers share a
//! bounded channel:
//!
//! - the collector batches records into the [`Repository`] and queues
//!   extracted keywords on the [`KeywordCursor`];
//! - the discoverer pulls keywords, searches them and expands every owner
//!   found in the results.
//!
//! Progress (seed marker, keyword queue and cursor, error ledger) lives in
//! the [`SnapshotStore`], so a dumped store resumes where the run stopped.

mod collector;
mod discoverer;
pub mod ledger;
mod pipeline;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::Error;
use crate::cache::{BUNDLES_KEY, KeywordCursor, LAST_KEY, SnapshotStore};
use crate::config::AppConfig;
use crate::models::{AppRecord, Keywords};
use crate::traits::{ExternalSource, LineSource, Repository};
use collector::Collector;
use discoverer::Discoverer;
pub use ledger::{ErrorKind, ErrorLedger, ErrorRecord};
use pipeline::{Origin, Pipeline};

/// Message carried from producers to the collector.
#[derive(Debug, Clone)]
pub enum Discovered {
    Record(AppRecord),
    Keywords(Keywords),
}

impl Discovered {
    pub fn kind(&self) -> &'static str {
        match self {
            Discovered::Record(_) => "record",
            Discovered::Keywords(_) => "keywords",
        }
    }
}

/// Tuning knobs for a run.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub keys_count: usize,
    pub channel_capacity: usize,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub idle_poll: Duration,
    pub retry_delay: Duration,
    pub shutdown_grace: Duration,
    pub stop_timeout: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            keys_count: config.keys_count,
            channel_capacity: config.channel_capacity,
            batch_size: config.batch_size,
            max_in_flight: config.max_in_flight,
            idle_poll: Duration::from_millis(config.idle_poll_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }
}

/// Lifecycle of a [`Crawler`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Totals reported when a run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Records fetched successfully.
    pub fetched: u64,
    /// Records written to the repository.
    pub persisted: u64,
    pub failed_batches: u64,
    /// Keywords appended to the cursor.
    pub keywords_queued: u64,
    /// Ledger size at the end of the run, including earlier runs.
    pub errors: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) fetched: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) failed_batches: AtomicU64,
    pub(crate) keywords_queued: AtomicU64,
}

/// Resumable crawl over a seed list and the keywords it yields.
pub struct Crawler {
    store: Arc<SnapshotStore>,
    cursor: Arc<KeywordCursor>,
    ledger: ErrorLedger,
    source: Arc<dyn ExternalSource>,
    repository: Arc<dyn Repository>,
    lines: Arc<dyn LineSource>,
    settings: CrawlSettings,
    state: Mutex<CrawlState>,
    /// Stops the seed feeder and the discoverer.
    cancel: CancellationToken,
    /// Closes the channel and abandons in-flight fetches and searches.
    close: CancellationToken,
    /// Seed feeder and discoverer.
    workers: TaskTracker,
    /// Extractions and owner expansions.
    tasks: TaskTracker,
    counters: Arc<Counters>,
}

impl Crawler {
    pub fn new(
        store: Arc<SnapshotStore>, source: Arc<dyn ExternalSource>, repository: Arc<dyn Repository>,
        lines: Arc<dyn LineSource>, settings: CrawlSettings,
    ) -> Self {
        let cursor = Arc::new(KeywordCursor::new(store.clone()));
        let ledger = ErrorLedger::new(store.clone());
        Self {
            store,
            cursor,
            ledger,
            source,
            repository,
            lines,
            settings,
            state: Mutex::new(CrawlState::Idle),
            cancel: CancellationToken::new(),
            close: CancellationToken::new(),
            workers: TaskTracker::new(),
            tasks: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn state(&self) -> CrawlState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cursor(&self) -> &KeywordCursor {
        &self.cursor
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    fn transition(&self, from: CrawlState, to: CrawlState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn set_state(&self, to: CrawlState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    /// Crawl the seeds in `seed_path`, then follow keywords until they run
    /// out or [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the crawler has already run
    /// - any error from reading the seed file or storing the seed list
    pub async fn scrap(&self, seed_path: &Path) -> Result<CrawlSummary, Error> {
        if !self.transition(CrawlState::Idle, CrawlState::Running) {
            return Err(Error::InvalidState(format!("cannot start a crawler in state {:?}", self.state())));
        }

        let seeds = match self.load_seeds(seed_path).await {
            Ok(seeds) => seeds,
            Err(e) => {
                self.workers.close();
                self.tasks.close();
                self.set_state(CrawlState::Stopped);
                return Err(e);
            }
        };
        let start = self.resume_index(&seeds);
        tracing::info!(seeds = seeds.len(), resume_at = start, "crawl started");

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let collector = Collector {
            repository: self.repository.clone(),
            cursor: self.cursor.clone(),
            ledger: self.ledger.clone(),
            counters: self.counters.clone(),
            batch_size: self.settings.batch_size,
            keys_count: self.settings.keys_count,
        };
        let collector = tokio::spawn(collector.run(rx, self.close.clone()));

        let pipeline = Pipeline {
            source: self.source.clone(),
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            tx,
            tasks: self.tasks.clone(),
            close: self.close.clone(),
            counters: self.counters.clone(),
        };

        let discoverer = Discoverer {
            pipeline: pipeline.clone(),
            cursor: self.cursor.clone(),
            permits: Arc::new(Semaphore::new(self.settings.max_in_flight)),
            cancel: self.cancel.clone(),
            idle_poll: self.settings.idle_poll,
            retry_delay: self.settings.retry_delay,
        };
        self.workers.spawn(discoverer.run());
        self.workers.spawn(feed_seeds(pipeline, seeds, start, self.cancel.clone()));
        self.workers.close();

        self.workers.wait().await;
        self.tasks.close();
        self.tasks.wait().await;

        if let Err(e) = collector.await {
            tracing::error!(error = %e, "collector task failed");
        }

        self.set_state(CrawlState::Stopped);
        let summary = self.summary();
        tracing::info!(
            fetched = summary.fetched,
            persisted = summary.persisted,
            failed_batches = summary.failed_batches,
            keywords_queued = summary.keywords_queued,
            errors = summary.errors,
            "crawl finished"
        );
        Ok(summary)
    }

    /// Ask a running crawl to wind down.
    ///
    /// Cancels the feeder and the discoverer and waits (up to the stop
    /// timeout) for both to return, gives in-flight fetches the grace period,
    /// then closes the channel so the collector drains. [`scrap`](Self::scrap)
    /// returns once the collector is done.
    pub async fn stop(&self) {
        if self.transition(CrawlState::Idle, CrawlState::Stopped) {
            tracing::debug!("stop before start");
            return;
        }
        if !self.transition(CrawlState::Running, CrawlState::Stopping) {
            tracing::debug!(state = ?self.state(), "stop ignored");
            return;
        }

        tracing::info!("stopping crawl");
        self.cancel.cancel();

        if tokio::time::timeout(self.settings.stop_timeout, self.workers.wait()).await.is_err() {
            tracing::warn!(timeout = ?self.settings.stop_timeout, "workers did not acknowledge stop in time");
        }

        self.tasks.close();
        if tokio::time::timeout(self.settings.shutdown_grace, self.tasks.wait()).await.is_err() {
            tracing::info!(in_flight = self.tasks.len(), "grace period elapsed, abandoning in-flight fetches");
        }

        self.close.cancel();
    }

    /// Counters gathered so far.
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            fetched: self.counters.fetched.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
            keywords_queued: self.counters.keywords_queued.load(Ordering::Relaxed),
            errors: self.ledger.len(),
        }
    }

    async fn load_seeds(&self, seed_path: &Path) -> Result<Vec<String>, Error> {
        let seeds = self.lines.read_lines(seed_path).await?;
        self.store.set(BUNDLES_KEY, &seeds)?;
        Ok(seeds)
    }

    /// Index of the first seed still to process.
    fn resume_index(&self, seeds: &[String]) -> usize {
        let last = match self.store.get::<String>(LAST_KEY) {
            Ok(Some(last)) => last,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable progress marker");
                return 0;
            }
        };

        match seeds.iter().position(|seed| *seed == last) {
            Some(index) => index + 1,
            None => {
                tracing::warn!(last = %last, "progress marker not in seed list, starting over");
                0
            }
        }
    }
}

async fn feed_seeds(pipeline: Pipeline, seeds: Vec<String>, start: usize, cancel: CancellationToken) {
    for bundle in seeds.iter().skip(start) {
        if cancel.is_cancelled() {
            tracing::info!(bundle = %bundle, "seed feed interrupted");
            return;
        }
        pipeline.fetch_and_store(bundle, Origin::Seed).await;
    }
    tracing::info!("seed feed finished");
}
