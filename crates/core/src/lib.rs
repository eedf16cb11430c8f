//! Core types and crawl orchestration for appscout.
//!
//! This crate provides:
//! - Snapshot-persisted key/value store and keyword cursor
//! - Crawl orchestrator with its error ledger
//! - SQLite record repository
//! - Unified error types and configuration

pub mod cache;
pub mod config;
pub mod crawl;
pub mod error;
pub mod models;
pub mod seeds;
pub mod storage;
pub mod traits;

pub use cache::{KeywordCursor, LoadOptions, SnapshotStore};
pub use config::{AppConfig, ConfigError, DatabaseBackend, DatabaseConfig};
pub use crawl::{CrawlSettings, CrawlState, CrawlSummary, Crawler, Discovered, ErrorKind, ErrorLedger, ErrorRecord};
pub use error::Error;
pub use models::{AppRecord, DeveloperContacts, Keywords};
pub use seeds::FileLines;
pub use storage::AppDb;
pub use traits::{ExternalSource, LineSource, Repository};
