//! Network-facing implementations for appscout.
//!
//! This crate provides the metadata API client used as the crawl's
//! [`ExternalSource`](appscout_core::ExternalSource) and the ClickHouse
//! [`Repository`](appscout_core::Repository).

pub mod api;
pub mod clickhouse;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiConfig, ApiError, Endpoint};
pub use clickhouse::{ClickhouseConfig, ClickhouseRepository};
