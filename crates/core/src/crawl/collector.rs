//! Channel consumer: batches records into the repository and queues
//! extracted keywords on the cursor.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ledger::{ErrorKind, ErrorLedger};
use super::{Counters, Discovered};
use crate::cache::KeywordCursor;
use crate::models::{AppRecord, Keywords, top_keywords};
use crate::traits::Repository;

pub(crate) struct Collector {
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) cursor: Arc<KeywordCursor>,
    pub(crate) ledger: ErrorLedger,
    pub(crate) counters: Arc<Counters>,
    pub(crate) batch_size: usize,
    pub(crate) keys_count: usize,
}

impl Collector {
    /// Consume until every sender is gone or `close` fires, then flush
    /// what is left one record at a time.
    pub(crate) async fn run(self, mut rx: mpsc::Receiver<Discovered>, close: CancellationToken) {
        let mut buffer: Vec<AppRecord> = Vec::with_capacity(self.batch_size);
        let mut closing = false;

        loop {
            let message = if closing {
                rx.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = close.cancelled() => {
                        tracing::debug!("closing channel");
                        rx.close();
                        closing = true;
                        continue;
                    }
                    message = rx.recv() => message,
                }
            };

            let Some(message) = message else { break };
            match message {
                Discovered::Record(app) => {
                    buffer.push(app);
                    if buffer.len() >= self.batch_size {
                        self.flush_batch(&mut buffer).await;
                    }
                }
                Discovered::Keywords(keywords) => self.queue_keywords(&keywords),
            }
        }

        self.drain(buffer).await;
        tracing::debug!("collector finished");
    }

    async fn flush_batch(&self, buffer: &mut Vec<AppRecord>) {
        let batch = std::mem::take(buffer);
        match self.repository.insert_batch(&batch).await {
            Ok(()) => {
                self.counters.persisted.fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::info!(count = batch.len(), "batch stored");
            }
            Err(e) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                let subject = batch.iter().map(|app| app.bundle.as_str()).collect::<Vec<_>>().join(",");
                self.ledger.record(ErrorKind::Db, &e, &subject);
            }
        }
        buffer.reserve(self.batch_size);
    }

    async fn drain(&self, buffer: Vec<AppRecord>) {
        if buffer.is_empty() {
            return;
        }
        tracing::info!(count = buffer.len(), "flushing remaining records");
        for app in buffer {
            match self.repository.insert_one(&app).await {
                Ok(()) => {
                    self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => self.ledger.record(ErrorKind::Db, &e, &app.bundle),
            }
        }
    }

    fn queue_keywords(&self, keywords: &Keywords) {
        for keyword in top_keywords(keywords, self.keys_count) {
            match self.cursor.append(&keyword) {
                Ok(_) => {
                    self.counters.keywords_queued.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => self.ledger.record(ErrorKind::KeyCache, &e, &keyword),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::cache::SnapshotStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRepo {
        batches: Mutex<Vec<usize>>,
        singles: Mutex<Vec<String>>,
        fail_batches: bool,
    }

    #[async_trait]
    impl Repository for RecordingRepo {
        async fn insert_one(&self, record: &AppRecord) -> Result<(), Error> {
            self.singles.lock().unwrap().push(record.bundle.clone());
            Ok(())
        }

        async fn insert_batch(&self, records: &[AppRecord]) -> Result<(), Error> {
            if self.fail_batches {
                return Err(Error::Storage("connection refused".into()));
            }
            self.batches.lock().unwrap().push(records.len());
            Ok(())
        }
    }

    fn collector(repo: Arc<RecordingRepo>, store: Arc<SnapshotStore>, batch_size: usize) -> Collector {
        Collector {
            repository: repo,
            cursor: Arc::new(KeywordCursor::new(store.clone())),
            ledger: ErrorLedger::new(store),
            counters: Arc::new(Counters::default()),
            batch_size,
            keys_count: 2,
        }
    }

    #[tokio::test]
    async fn test_batches_then_single_drain() {
        let repo = Arc::new(RecordingRepo::default());
        let store = Arc::new(SnapshotStore::new("unused-cache.json"));
        let collector = collector(repo.clone(), store, 3);
        let counters = collector.counters.clone();

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(collector.run(rx, CancellationToken::new()));
        for i in 0..7 {
            tx.send(Discovered::Record(AppRecord::with_bundle(format!("com.app.{i}")))).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*repo.batches.lock().unwrap(), vec![3, 3]);
        assert_eq!(*repo.singles.lock().unwrap(), vec!["com.app.6"]);
        assert_eq!(counters.persisted.load(Ordering::Relaxed), 7);
    }

    #[tokio::test]
    async fn test_failed_batch_is_recorded_and_dropped() {
        let repo = Arc::new(RecordingRepo { fail_batches: true, ..Default::default() });
        let store = Arc::new(SnapshotStore::new("unused-cache.json"));
        let collector = collector(repo.clone(), store.clone(), 2);
        let counters = collector.counters.clone();

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(collector.run(rx, CancellationToken::new()));
        tx.send(Discovered::Record(AppRecord::with_bundle("com.a"))).await.unwrap();
        tx.send(Discovered::Record(AppRecord::with_bundle("com.b"))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let ledger = ErrorLedger::new(store);
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ErrorKind::Db);
        assert_eq!(entries[0].bundle, "com.a,com.b");
        assert_eq!(counters.failed_batches.load(Ordering::Relaxed), 1);
        assert!(repo.singles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keywords_are_ranked_and_queued() {
        let repo = Arc::new(RecordingRepo::default());
        let store = Arc::new(SnapshotStore::new("unused-cache.json"));
        let collector = collector(repo, store.clone(), 50);

        let keywords: Keywords =
            [("key", 1), ("key3", 3), ("key2", 2)].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(collector.run(rx, CancellationToken::new()));
        tx.send(Discovered::Keywords(keywords)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let cursor = KeywordCursor::new(store);
        assert_eq!(cursor.next().unwrap(), "key3");
        assert_eq!(cursor.next().unwrap(), "key2");
        assert!(matches!(cursor.next(), Err(Error::CursorExhausted)));
    }

    #[tokio::test]
    async fn test_close_drains_buffered_records() {
        let repo = Arc::new(RecordingRepo::default());
        let store = Arc::new(SnapshotStore::new("unused-cache.json"));
        let collector = collector(repo.clone(), store, 50);

        let close = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(collector.run(rx, close.clone()));
        tx.send(Discovered::Record(AppRecord::with_bundle("com.a"))).await.unwrap();
        tx.send(Discovered::Record(AppRecord::with_bundle("com.b"))).await.unwrap();

        close.cancel();
        handle.await.unwrap();

        assert!(tx.send(Discovered::Record(AppRecord::with_bundle("com.late"))).await.is_err());
        assert_eq!(*repo.singles.lock().unwrap(), vec!["com.a", "com.b"]);
    }
}
