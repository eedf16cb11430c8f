//! Metadata API client error types.

use std::sync::Arc;

/// Errors from the metadata API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No credential configured.
    #[error("missing API key: APPSCOUT_API_KEY not set")]
    MissingApiKey,

    /// Base URL cannot be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Request parameters rejected before sending.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Result count outside the accepted range.
    #[error("invalid count: {0} (must be 1-{max})", max = super::request::MAX_COUNT)]
    InvalidCount(usize),

    /// Authentication failed (invalid API key).
    #[error("authentication failed: invalid API key")]
    AuthError,

    /// Rate limited by the service.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// Non-success HTTP response.
    #[error("external api response with status {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { ApiError::Timeout } else { ApiError::Network(Arc::new(err)) }
    }
}

impl ApiError {
    /// Map an HTTP status to an error, or `None` for 2xx.
    pub fn from_status(status: reqwest::StatusCode) -> Option<Self> {
        match status.as_u16() {
            200..=299 => None,
            401 | 403 => Some(ApiError::AuthError),
            429 => Some(ApiError::RateLimited),
            code => Some(ApiError::HttpError { status: code }),
        }
    }
}
