//! Metadata API client.
//!
//! Every endpoint takes a JSON body over `POST` and authenticates with the
//! raw key in the `Authorization` header:
//!
//! - `/bundle`: one app by bundle identifier
//! - `/keywords_from`: weighted keywords for an app's text
//! - `/mainPage`: apps matching a keyword
//! - `/devapps`: apps published by one developer
//!
//! Requests are spaced by a minimum interval. Any non-2xx status is an error.

pub mod error;
pub mod request;

pub use error::ApiError;
pub use request::{KeywordsRequest, ListRequest, LookupRequest};

use appscout_core::{AppConfig, AppRecord, Error, ExternalSource, Keywords};
use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "appscout/0.1";

/// Service endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Bundle,
    KeywordsFrom,
    MainPage,
    DevApps,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Bundle => "bundle",
            Endpoint::KeywordsFrom => "keywords_from",
            Endpoint::MainPage => "mainPage",
            Endpoint::DevApps => "devapps",
        }
    }
}

/// Metadata API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub hl: String,
    pub gl: String,
    /// Keywords requested per extraction.
    pub keys_count: usize,
    /// Results requested per keyword search.
    pub apps_count: usize,
    /// Results requested per developer lookup.
    pub dev_apps_count: usize,
    pub timeout: Duration,
    /// Minimum spacing between requests; zero disables spacing.
    pub min_interval: Duration,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://127.0.0.1:8080".to_string(),
            hl: "en".to_string(),
            gl: "us".to_string(),
            keys_count: 10,
            apps_count: 250,
            dev_apps_count: 100,
            timeout: DEFAULT_TIMEOUT,
            min_interval: Duration::ZERO,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    /// Build from the application configuration.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ApiError> {
        let api_key = config.require_api_key().map_err(|_| ApiError::MissingApiKey)?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: config.api_url.clone(),
            hl: config.hl.clone(),
            gl: config.gl.clone(),
            keys_count: config.keys_count,
            apps_count: config.apps_count,
            dev_apps_count: config.dev_apps_count,
            timeout: config.timeout(),
            min_interval: config.request_interval(),
            user_agent: config.user_agent.clone(),
        })
    }
}

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now)),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// Metadata API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        if config.api_key.is_empty() {
            return Err(ApiError::MissingApiKey);
        }

        let parsed = url::Url::parse(&config.base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!("unsupported scheme: {}", parsed.scheme())));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Network(Arc::new(e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let rate_limiter = Arc::new(RateLimiter::new(config.min_interval));
        Ok(Self { http, config, base_url, rate_limiter })
    }

    /// Full URL of an endpoint.
    pub fn endpoint(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    async fn post<B, R>(&self, endpoint: Endpoint, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let url = self.endpoint(endpoint);

        let http_response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, &self.config.api_key)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = http_response.status();
        tracing::debug!(endpoint = endpoint.path(), status = %status, "api response");

        if let Some(err) = ApiError::from_status(status) {
            return Err(err);
        }

        let bytes = http_response.bytes().await?;
        let parsed = serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))?;

        tracing::debug!(endpoint = endpoint.path(), elapsed = ?start.elapsed(), bytes = bytes.len(), "api call completed");
        Ok(parsed)
    }

    /// Metadata for one app.
    pub async fn app(&self, bundle: &str) -> Result<AppRecord, ApiError> {
        let req = LookupRequest { query: bundle.to_string(), hl: self.config.hl.clone(), gl: self.config.gl.clone() };
        req.validate()?;
        self.post(Endpoint::Bundle, &req).await
    }

    /// Weighted keywords for an app's text.
    pub async fn keywords(
        &self, title: &str, description: &str, short_description: &str, reviews: &str,
    ) -> Result<Keywords, ApiError> {
        let req = KeywordsRequest {
            title: title.to_string(),
            description: description.to_string(),
            short_description: short_description.to_string(),
            reviews: reviews.to_string(),
            keys_count: self.config.keys_count,
            lang: self.config.hl.clone(),
        };
        req.validate()?;
        self.post(Endpoint::KeywordsFrom, &req).await
    }

    /// Apps matching `keyword`.
    pub async fn main_page(&self, keyword: &str) -> Result<Vec<AppRecord>, ApiError> {
        let req = self.list_request(keyword, self.config.apps_count);
        req.validate()?;
        self.post(Endpoint::MainPage, &req).await
    }

    /// Apps published by `developer_id`.
    pub async fn developer_apps(&self, developer_id: &str) -> Result<Vec<AppRecord>, ApiError> {
        let req = self.list_request(developer_id, self.config.dev_apps_count);
        req.validate()?;
        self.post(Endpoint::DevApps, &req).await
    }

    fn list_request(&self, query: &str, count: usize) -> ListRequest {
        ListRequest { query: query.to_string(), hl: self.config.hl.clone(), gl: self.config.gl.clone(), count }
    }
}

#[async_trait]
impl ExternalSource for ApiClient {
    async fn fetch_record(&self, bundle: &str) -> Result<AppRecord, Error> {
        self.app(bundle).await.map_err(|e| Error::Fetch(e.to_string()))
    }

    async fn extract_keywords(
        &self, title: &str, description: &str, short_description: &str, reviews: &str,
    ) -> Result<Keywords, Error> {
        self.keywords(title, description, short_description, reviews)
            .await
            .map_err(|e| Error::Extraction(e.to_string()))
    }

    async fn search(&self, keyword: &str) -> Result<Vec<AppRecord>, Error> {
        self.main_page(keyword).await.map_err(|e| Error::Search(e.to_string()))
    }

    async fn owner_records(&self, owner_id: &str) -> Result<Vec<AppRecord>, Error> {
        self.developer_apps(owner_id).await.map_err(|e| Error::Fetch(e.to_string()))
    }
}
