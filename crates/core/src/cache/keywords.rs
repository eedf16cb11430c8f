//! Ordered keyword queue with a persisted read position.
//!
//! The sequence lives under [`KEYS_KEY`] and the index of the last consumed
//! keyword under [`KEYS_NEXT_KEY`], so both survive a snapshot round trip.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::store::{KEYS_KEY, KEYS_NEXT_KEY, SnapshotStore};
use crate::Error;

/// One queued keyword. `pos` is informational; sequence order is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    #[serde(default)]
    pub pos: usize,
    #[serde(default)]
    pub key: String,
}

/// Keyword cursor backed by a [`SnapshotStore`].
#[derive(Debug)]
pub struct KeywordCursor {
    store: Arc<SnapshotStore>,
    is_empty: AtomicBool,
}

impl KeywordCursor {
    /// Wrap `store`. A store reloaded with queued keywords starts non-empty.
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        let queued = store.transaction(|entries| {
            entries.get_ref(KEYS_KEY).and_then(|v| v.as_array()).is_some_and(|a| !a.is_empty())
        });
        Self { store, is_empty: AtomicBool::new(!queued) }
    }

    /// Queue `text` at the end of the sequence. Returns its position.
    pub fn append(&self, text: &str) -> Result<usize, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("keyword cannot be empty".into()));
        }

        self.store.transaction(|entries| {
            self.is_empty.store(false, Ordering::Release);
            entries.push(KEYS_KEY, |len| KeywordRecord { pos: len + 1, key: text.to_string() })
        })
    }

    /// Return the next unconsumed keyword and advance the cursor.
    ///
    /// # Errors
    ///
    /// - `CursorEmpty` if nothing is queued (or exhaustion was already reported)
    /// - `CursorExhausted` the first time the cursor runs past the end
    pub fn next(&self) -> Result<String, Error> {
        if self.is_empty.load(Ordering::Acquire) {
            return Err(Error::CursorEmpty);
        }

        self.store.transaction(|entries| {
            let candidate = match entries.get::<usize>(KEYS_NEXT_KEY)? {
                Some(position) => position.checked_add(1),
                None => Some(0),
            };
            let Some(candidate) = candidate else {
                self.is_empty.store(true, Ordering::Release);
                return Err(Error::CursorExhausted);
            };

            let record = entries
                .get_ref(KEYS_KEY)
                .and_then(|v| v.as_array())
                .and_then(|keys| keys.get(candidate))
                .map(|v| KeywordRecord::deserialize(v).map_err(|e| Error::wrong_shape(KEYS_KEY, e)))
                .transpose()?;

            match record {
                Some(record) => {
                    entries.set(KEYS_NEXT_KEY, &candidate)?;
                    Ok(record.key)
                }
                None => {
                    self.is_empty.store(true, Ordering::Release);
                    Err(Error::CursorExhausted)
                }
            }
        })
    }

    /// Step the cursor back by one so the last keyword is delivered again.
    ///
    /// A no-op when nothing has been consumed or the cursor is at index 0.
    pub fn rollback(&self) -> Result<(), Error> {
        self.store.transaction(|entries| match entries.get::<usize>(KEYS_NEXT_KEY)? {
            None | Some(0) => Ok(()),
            Some(position) => {
                entries.set(KEYS_NEXT_KEY, &(position - 1))?;
                if self.is_empty.swap(false, Ordering::AcqRel) {
                    tracing::debug!("cursor re-armed by rollback");
                }
                Ok(())
            }
        })
    }

    /// Rewrite the sequence with one record per distinct keyword.
    ///
    /// First-seen order is kept and positions are renumbered `1..=n`. The
    /// cursor position is left untouched. Returns the new length.
    pub fn distinct(&self) -> Result<usize, Error> {
        if self.is_empty.load(Ordering::Acquire) {
            return Err(Error::CursorEmpty);
        }

        self.store.update::<Vec<KeywordRecord>, _>(KEYS_KEY, |keys| {
            let mut seen = HashSet::with_capacity(keys.len());
            keys.retain(|record| seen.insert(record.key.clone()));
            for (i, record) in keys.iter_mut().enumerate() {
                record.pos = i + 1;
            }
            keys.len()
        })
    }

    /// Number of queued keywords, consumed or not.
    pub fn len(&self) -> usize {
        self.store.transaction(|entries| entries.get_ref(KEYS_KEY).and_then(|v| v.as_array()).map_or(0, Vec::len))
    }

    /// Whether the cursor currently reports itself as empty.
    pub fn is_empty(&self) -> bool {
        self.is_empty.load(Ordering::Acquire)
    }

    /// Number of keywords not yet returned by [`next`](Self::next).
    pub fn remaining(&self) -> usize {
        self.store.transaction(|entries| {
            let consumed = match entries.get::<usize>(KEYS_NEXT_KEY) {
                Ok(Some(position)) => position.saturating_add(1),
                _ => 0,
            };
            let total = entries.get_ref(KEYS_KEY).and_then(|v| v.as_array()).map_or(0, Vec::len);
            total.saturating_sub(consumed)
        })
    }
}
