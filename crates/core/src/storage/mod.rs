//! Local SQLite repository for scraped records.

pub mod connection;
pub mod records;

pub use connection::AppDb;
