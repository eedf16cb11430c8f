//! ClickHouse repository over the HTTP interface.
//!
//! Inserts are sent as one `INSERT ... FORMAT JSONEachRow` request per call,
//! so a batch lands as a single block.

use std::sync::Arc;
use std::time::Duration;

use appscout_core::{AppConfig, AppRecord, Error, Repository};
use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::api::ApiError;

const SCHEMA: &str = include_str!("../../schema/apps.sql");

/// Connection settings for the ClickHouse HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ClickhouseConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
    pub timeout: Duration,
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
            table: "apps".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for ClickhouseConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.database.url.clone(),
            database: config.database.name.clone(),
            user: config.database.user.clone(),
            password: config.database.password.clone(),
            table: config.database.table.clone(),
            timeout: config.timeout(),
        }
    }
}

/// One `apps` row as ClickHouse expects it in JSONEachRow.
#[derive(Debug, Serialize)]
struct Row<'a> {
    bundle: &'a str,
    developer_id: &'a str,
    developer: &'a str,
    title: &'a str,
    categories: &'a str,
    price: &'a str,
    picture: &'a str,
    screenshots: &'a [String],
    rating: &'a str,
    review_count: &'a str,
    rating_histogram: &'a [String],
    description: &'a str,
    short_description: &'a str,
    recent_changes: &'a str,
    release_date: &'a str,
    last_update_date: &'a str,
    app_size: &'a str,
    installs: &'a str,
    version: &'a str,
    android_version: &'a str,
    content_rating: &'a str,
    #[serde(rename = "developer_contacts.email")]
    developer_email: [&'a str; 1],
    #[serde(rename = "developer_contacts.contacts")]
    developer_contacts: [&'a str; 1],
    privacy_policy: &'a str,
}

impl<'a> From<&'a AppRecord> for Row<'a> {
    fn from(app: &'a AppRecord) -> Self {
        Self {
            bundle: &app.bundle,
            developer_id: &app.developer_id,
            developer: &app.developer,
            title: &app.title,
            categories: &app.categories,
            price: &app.price,
            picture: &app.picture,
            screenshots: &app.screenshots,
            rating: &app.rating,
            review_count: &app.review_count,
            rating_histogram: &app.rating_histogram,
            description: &app.description,
            short_description: &app.short_description,
            recent_changes: &app.recent_changes,
            release_date: &app.release_date,
            last_update_date: &app.last_update_date,
            app_size: &app.app_size,
            installs: &app.installs,
            version: &app.version,
            android_version: &app.android_version,
            content_rating: &app.content_rating,
            developer_email: [app.developer_contacts.email.as_str()],
            developer_contacts: [app.developer_contacts.contacts.as_str()],
            privacy_policy: &app.privacy_policy,
        }
    }
}

/// Newline-delimited JSON body for an insert.
fn encode_rows(records: &[AppRecord]) -> Result<String, ApiError> {
    let mut body = String::new();
    for record in records {
        let line = serde_json::to_string(&Row::from(record)).map_err(|e| ApiError::Parse(e.to_string()))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(|part| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// [`Repository`] backed by ClickHouse.
#[derive(Debug, Clone)]
pub struct ClickhouseRepository {
    http: reqwest::Client,
    config: ClickhouseConfig,
    endpoint: Url,
}

impl ClickhouseRepository {
    pub fn new(config: ClickhouseConfig) -> Result<Self, ApiError> {
        let endpoint = Url::parse(&config.url).map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", config.url)))?;
        if !is_identifier(&config.table) {
            return Err(ApiError::InvalidQuery(format!("invalid table name: {}", config.table)));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(Arc::new(e)))?;

        Ok(Self { http, config, endpoint })
    }

    /// Create the target table when it does not exist.
    pub async fn init_schema(&self) -> Result<(), ApiError> {
        let ddl = SCHEMA.replace("{table}", &self.config.table);
        self.execute(None, ddl).await?;
        tracing::info!(table = %self.config.table, "clickhouse schema ready");
        Ok(())
    }

    fn url_for(&self, query: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.config.database);
            if let Some(query) = query {
                pairs.append_pair("query", query);
            }
        }
        url
    }

    /// POST `body`, with `query` in the URL when the body carries data.
    async fn execute(&self, query: Option<&str>, body: String) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url_for(query))
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if let Some(err) = ApiError::from_status(status) {
            let detail = response.text().await.unwrap_or_default();
            tracing::debug!(status = %status, detail = %detail.trim(), "clickhouse rejected request");
            return Err(err);
        }
        Ok(())
    }

    async fn insert_rows(&self, records: &[AppRecord]) -> Result<(), ApiError> {
        if records.is_empty() {
            return Ok(());
        }
        let query = format!("INSERT INTO {} FORMAT JSONEachRow", self.config.table);
        self.execute(Some(&query), encode_rows(records)?).await?;
        tracing::debug!(count = records.len(), table = %self.config.table, "inserted rows");
        Ok(())
    }
}

#[async_trait]
impl Repository for ClickhouseRepository {
    async fn insert_one(&self, record: &AppRecord) -> Result<(), Error> {
        self.insert_rows(std::slice::from_ref(record))
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    async fn insert_batch(&self, records: &[AppRecord]) -> Result<(), Error> {
        self.insert_rows(records).await.map_err(|e| Error::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;
    use appscout_core::DeveloperContacts;

    fn repository(url: &str) -> ClickhouseRepository {
        ClickhouseRepository::new(ClickhouseConfig {
            url: url.into(),
            database: "stores".into(),
            password: "pw".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn sample(bundle: &str) -> AppRecord {
        AppRecord {
            screenshots: vec!["s1.png".into()],
            developer_contacts: DeveloperContacts { email: "dev@example.com".into(), contacts: "Main st".into() },
            ..AppRecord::with_bundle(bundle)
        }
    }

    #[test]
    fn test_row_encoding() {
        let body = encode_rows(&[sample("com.a"), sample("com.b")]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let row: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(row["bundle"], "com.a");
        assert_eq!(row["screenshots"][0], "s1.png");
        assert_eq!(row["developer_contacts.email"][0], "dev@example.com");
        assert_eq!(row["developer_contacts.contacts"][0], "Main st");
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_identifier("apps"));
        assert!(is_identifier("stores.apps_v2"));
        assert!(!is_identifier("apps; DROP TABLE x"));
        assert!(!is_identifier(""));

        let config = ClickhouseConfig { table: "bad name".into(), ..Default::default() };
        assert!(matches!(ClickhouseRepository::new(config), Err(ApiError::InvalidQuery(_))));
    }

    #[test]
    fn test_schema_template() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS {table}"));
    }

    #[tokio::test]
    async fn test_insert_batch_request() {
        let (url, request) = serve_once(200, "").await;
        repository(&url).insert_batch(&[sample("com.a"), sample("com.b")]).await.unwrap();

        let request = request.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /?database=stores&query=INSERT+INTO+apps+FORMAT+JSONEachRow "));
        assert!(lower.contains("x-clickhouse-user: default"));
        assert!(lower.contains("x-clickhouse-key: pw"));
        assert!(request.contains(r#""bundle":"com.a""#));
        assert!(request.contains(r#""bundle":"com.b""#));
    }

    #[tokio::test]
    async fn test_insert_failure_maps_to_storage_error() {
        let (url, _request) = serve_once(500, "Code: 60. Table stores.apps does not exist").await;
        let err = repository(&url).insert_one(&sample("com.a")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_init_schema_sends_ddl() {
        let (url, request) = serve_once(200, "").await;
        repository(&url).init_schema().await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /?database=stores "));
        assert!(request.contains("CREATE TABLE IF NOT EXISTS apps"));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let repo = repository("http://127.0.0.1:9");
        repo.insert_batch(&[]).await.unwrap();
    }
}
