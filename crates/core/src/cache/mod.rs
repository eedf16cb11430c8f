//! In-memory crawl state persisted as a JSON snapshot.
//!
//! - [`SnapshotStore`]: mutex-guarded key/value map, dumped to and loaded from a file
//! - [`KeywordCursor`]: ordered keyword queue with a persisted read position

pub mod keywords;
pub mod store;

pub use keywords::{KeywordCursor, KeywordRecord};
pub use store::{BUNDLES_KEY, CacheEntry, ERRORS_KEY, Entries, KEYS_KEY, KEYS_NEXT_KEY, LAST_KEY, LoadOptions, SnapshotStore};
