//! Fetch-and-store path shared by the seed feeder and owner expansion.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::ledger::{ErrorKind, ErrorLedger};
use super::{Counters, Discovered};
use crate::cache::{LAST_KEY, SnapshotStore};
use crate::models::AppRecord;
use crate::traits::ExternalSource;

/// Where an identifier came from, which decides the follow-up work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Seed list: extract keywords and advance the progress marker.
    Seed,
    /// Owner expansion: store the record only.
    Owner,
}

#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) source: Arc<dyn ExternalSource>,
    pub(crate) store: Arc<SnapshotStore>,
    pub(crate) ledger: ErrorLedger,
    pub(crate) tx: mpsc::Sender<Discovered>,
    pub(crate) tasks: TaskTracker,
    pub(crate) close: CancellationToken,
    pub(crate) counters: Arc<Counters>,
}

impl Pipeline {
    /// Fetch `bundle`, publish the record and run the follow-up for `origin`.
    ///
    /// Failures go to the ledger; nothing is returned to the caller.
    pub(crate) async fn fetch_and_store(&self, bundle: &str, origin: Origin) {
        let fetched = tokio::select! {
            _ = self.close.cancelled() => {
                tracing::debug!(bundle = %bundle, "fetch abandoned, channel closing");
                return;
            }
            result = self.source.fetch_record(bundle) => result,
        };

        let app = match fetched {
            Ok(app) => app,
            Err(e) => {
                self.ledger.record(ErrorKind::Apps, &e, bundle);
                return;
            }
        };
        self.counters.fetched.fetch_add(1, Ordering::Relaxed);

        if origin == Origin::Seed {
            self.spawn_extraction(&app);
        }

        self.publish(Discovered::Record(app)).await;

        if origin == Origin::Seed
            && let Err(e) = self.store.set(LAST_KEY, bundle)
        {
            tracing::error!(bundle = %bundle, error = %e, "failed to advance progress marker");
        }
    }

    fn spawn_extraction(&self, app: &AppRecord) {
        let pipeline = self.clone();
        let bundle = app.bundle.clone();
        let title = app.title.clone();
        let description = app.description.clone();
        let short_description = app.short_description.clone();

        self.tasks.spawn(async move {
            let extracted = tokio::select! {
                _ = pipeline.close.cancelled() => return,
                result = pipeline.source.extract_keywords(&title, &description, &short_description, "") => result,
            };
            match extracted {
                Ok(keywords) if keywords.is_empty() => {
                    tracing::debug!(bundle = %bundle, "no keywords extracted");
                }
                Ok(keywords) => pipeline.publish(Discovered::Keywords(keywords)).await,
                Err(e) => pipeline.ledger.record(ErrorKind::Keys, &e, &bundle),
            }
        });
    }

    /// Send to the collector. After the channel closes the message is dropped.
    pub(crate) async fn publish(&self, message: Discovered) {
        if let Err(e) = self.tx.send(message).await {
            tracing::debug!(kind = e.0.kind(), "channel closed, dropping message");
        }
    }
}
