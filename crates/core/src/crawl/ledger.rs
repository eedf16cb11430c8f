//! Persistent record of per-identifier failures.
//!
//! Entries are appended to the `errors` key of the snapshot store so they
//! survive restarts alongside the rest of the crawl state.

use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::{ERRORS_KEY, SnapshotStore};

/// Failure class, serialized with the names used in the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Fetching a record failed.
    #[serde(rename = "apps")]
    Apps,
    /// Keyword search or extraction failed.
    #[serde(rename = "keys")]
    Keys,
    /// Repository insert failed.
    #[serde(rename = "db", alias = "Db")]
    Db,
    /// Queueing a keyword failed.
    #[serde(rename = "keyCache")]
    KeyCache,
    /// Listing an owner's records failed.
    #[serde(rename = "devapps")]
    DevApps,
}

/// One ledger entry: `{"t": kind, "er": message, "bundle": subject}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "t")]
    pub kind: ErrorKind,
    #[serde(rename = "er", default)]
    pub message: String,
    #[serde(default)]
    pub bundle: String,
}

/// Append-only error ledger backed by the snapshot store.
#[derive(Debug, Clone)]
pub struct ErrorLedger {
    store: Arc<SnapshotStore>,
}

impl ErrorLedger {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Log and persist a failure. Never fails; a ledger that cannot be
    /// written is itself logged.
    pub fn record(&self, kind: ErrorKind, error: &dyn Display, subject: &str) {
        tracing::warn!(kind = ?kind, subject = %subject, error = %error, "recorded failure");

        let entry = ErrorRecord { kind, message: error.to_string(), bundle: subject.to_string() };
        if let Err(e) = self.store.push(ERRORS_KEY, |_| entry) {
            tracing::error!(error = %e, "failed to persist error record");
        }
    }

    /// Every recorded failure, oldest first.
    pub fn entries(&self) -> Result<Vec<ErrorRecord>, Error> {
        Ok(self.store.get::<Vec<ErrorRecord>>(ERRORS_KEY)?.unwrap_or_default())
    }

    /// Number of recorded failures of `kind`.
    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.entries().map(|entries| entries.iter().filter(|e| e.kind == kind).count()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> ErrorLedger {
        ErrorLedger::new(Arc::new(SnapshotStore::new("unused-cache.json")))
    }

    #[test]
    fn test_record_and_count() {
        let ledger = ledger();
        ledger.record(ErrorKind::Apps, &"not found", "com.a");
        ledger.record(ErrorKind::Apps, &"timeout", "com.b");
        ledger.record(ErrorKind::DevApps, &"bad owner", "dev-1");

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.count_of(ErrorKind::Apps), 2);
        assert_eq!(ledger.count_of(ErrorKind::DevApps), 1);
        assert_eq!(ledger.count_of(ErrorKind::Db), 0);

        let entries = ledger.entries().unwrap();
        assert_eq!(entries[0].bundle, "com.a");
        assert_eq!(entries[1].message, "timeout");
    }

    #[test]
    fn test_record_wire_format() {
        let store = Arc::new(SnapshotStore::new("unused-cache.json"));
        let ledger = ErrorLedger::new(store.clone());
        ledger.record(ErrorKind::KeyCache, &Error::InvalidInput("blank".into()), "");

        let raw = store.get_value(ERRORS_KEY).unwrap();
        assert_eq!(raw[0]["t"], "keyCache");
        assert!(raw[0]["er"].as_str().unwrap().starts_with("INVALID_INPUT"));
        assert_eq!(raw[0]["bundle"], "");
    }

    #[test]
    fn test_legacy_kind_alias() {
        let record: ErrorRecord = serde_json::from_str(r#"{"t":"Db","er":"insert failed","bundle":"com.a"}"#).unwrap();
        assert_eq!(record.kind, ErrorKind::Db);
        assert_eq!(serde_json::to_value(&record).unwrap()["t"], "db");
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = ledger();
        assert!(ledger.is_empty());
        assert!(ledger.entries().unwrap().is_empty());
    }
}
