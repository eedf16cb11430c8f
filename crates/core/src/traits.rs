//! Collaborators the crawler drives: the metadata service, the record
//! repository and the seed reader.

use std::path::Path;

use async_trait::async_trait;

use crate::Error;
use crate::models::{AppRecord, Keywords};

/// External metadata/search service.
#[async_trait]
pub trait ExternalSource: Send + Sync {
    /// Full metadata for one bundle.
    async fn fetch_record(&self, bundle: &str) -> Result<AppRecord, Error>;

    /// Weighted keywords extracted from an app's text fields.
    async fn extract_keywords(
        &self, title: &str, description: &str, short_description: &str, reviews: &str,
    ) -> Result<Keywords, Error>;

    /// Apps matching a keyword.
    async fn search(&self, keyword: &str) -> Result<Vec<AppRecord>, Error>;

    /// Every app published by one developer.
    async fn owner_records(&self, owner_id: &str) -> Result<Vec<AppRecord>, Error>;
}

/// Destination for scraped records.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_one(&self, record: &AppRecord) -> Result<(), Error>;

    /// Insert every record or none of them.
    async fn insert_batch(&self, records: &[AppRecord]) -> Result<(), Error>;
}

/// Line-oriented input such as the seed file.
#[async_trait]
pub trait LineSource: Send + Sync {
    async fn read_lines(&self, path: &Path) -> Result<Vec<String>, Error>;
}
