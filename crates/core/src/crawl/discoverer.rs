//! Keyword-driven discovery: search each queued keyword, then expand every
//! owner found in the results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::ledger::ErrorKind;
use super::pipeline::{Origin, Pipeline};
use crate::Error;
use crate::cache::KeywordCursor;
use crate::models::AppRecord;

pub(crate) struct Discoverer {
    pub(crate) pipeline: Pipeline,
    pub(crate) cursor: Arc<KeywordCursor>,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) cancel: CancellationToken,
    pub(crate) idle_poll: Duration,
    pub(crate) retry_delay: Duration,
}

impl Discoverer {
    /// Run until the cursor is exhausted or the run is cancelled.
    pub(crate) async fn run(self) {
        while !self.cancel.is_cancelled() {
            match self.cursor.next() {
                Ok(keyword) => self.discover(&keyword).await,
                Err(Error::CursorExhausted) => {
                    tracing::info!("keywords exhausted, discovery finished");
                    break;
                }
                Err(Error::CursorEmpty) => {
                    tracing::debug!("keyword cursor empty, waiting");
                    self.pause(self.idle_poll).await;
                }
                Err(e) => {
                    self.pipeline.ledger.record(ErrorKind::KeyCache, &e, "");
                    self.pause(self.retry_delay).await;
                }
            }
        }
        tracing::debug!("discoverer stopped");
    }

    /// Search `keyword` and hand every owner in the results to the task
    /// tracker. Cancellation is checked between keywords, not here.
    async fn discover(&self, keyword: &str) {
        let found = tokio::select! {
            _ = self.pipeline.close.cancelled() => {
                tracing::warn!(keyword = %keyword, "search abandoned, channel closing");
                self.rollback(keyword);
                return;
            }
            result = self.pipeline.source.search(keyword) => result,
        };

        let apps = match found {
            Ok(apps) => apps,
            Err(e) => {
                self.pipeline.ledger.record(ErrorKind::Keys, &e, keyword);
                self.rollback(keyword);
                self.pause(self.retry_delay).await;
                return;
            }
        };

        let owners = distinct_owners(&apps);
        tracing::debug!(keyword = %keyword, results = apps.len(), owners = owners.len(), "search finished");

        for (i, owner) in owners.iter().enumerate() {
            let permit = tokio::select! {
                _ = self.pipeline.close.cancelled() => {
                    tracing::warn!(keyword = %keyword, skipped = owners.len() - i, "channel closing, owners not expanded");
                    return;
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let pipeline = self.pipeline.clone();
            let owner = owner.clone();
            self.pipeline.tasks.spawn(async move {
                let _permit = permit;
                expand_owner(&pipeline, &owner).await;
            });
        }
    }

    fn rollback(&self, keyword: &str) {
        if let Err(e) = self.cursor.rollback() {
            self.pipeline.ledger.record(ErrorKind::KeyCache, &e, keyword);
        }
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

async fn expand_owner(pipeline: &Pipeline, owner: &str) {
    let listed = tokio::select! {
        _ = pipeline.close.cancelled() => return,
        result = pipeline.source.owner_records(owner) => result,
    };

    let apps = match listed {
        Ok(apps) => apps,
        Err(e) => {
            pipeline.ledger.record(ErrorKind::DevApps, &e, owner);
            return;
        }
    };

    tracing::debug!(owner = %owner, count = apps.len(), "expanding owner");
    for app in apps {
        if pipeline.close.is_cancelled() {
            break;
        }
        if !app.bundle.is_empty() {
            pipeline.fetch_and_store(&app.bundle, Origin::Owner).await;
        }
    }
}

/// Non-empty owner ids in first-seen order.
fn distinct_owners(apps: &[AppRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    apps.iter()
        .map(|app| app.developer_id.as_str())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_owners() {
        let apps: Vec<AppRecord> = [("com.a", "dev-1"), ("com.b", ""), ("com.c", "dev-2"), ("com.d", "dev-1")]
            .into_iter()
            .map(|(bundle, owner)| AppRecord { developer_id: owner.into(), ..AppRecord::with_bundle(bundle) })
            .collect();
        assert_eq!(distinct_owners(&apps), vec!["dev-1", "dev-2"]);
    }

    #[test]
    fn test_distinct_owners_empty() {
        assert!(distinct_owners(&[]).is_empty());
    }
}
