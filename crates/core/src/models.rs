//! Records exchanged with the external metadata service and the repository.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Keyword → weight map returned by keyword extraction.
pub type Keywords = HashMap<String, i64>;

/// Application metadata, keyed by its `bundle` identifier.
///
/// Field names follow the metadata service's camelCase JSON. Missing fields
/// decode to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppRecord {
    pub bundle: String,
    pub developer_id: String,
    pub developer: String,
    pub title: String,
    pub categories: String,
    pub price: String,
    pub picture: String,
    pub screenshots: Vec<String>,
    pub rating: String,
    pub review_count: String,
    pub rating_histogram: Vec<String>,
    pub description: String,
    pub short_description: String,
    pub recent_changes: String,
    pub release_date: String,
    pub last_update_date: String,
    pub app_size: String,
    pub installs: String,
    pub version: String,
    pub android_version: String,
    pub content_rating: String,
    pub developer_contacts: DeveloperContacts,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub privacy_policy: String,
}

/// Contact block nested inside [`AppRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeveloperContacts {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contacts: String,
}

impl AppRecord {
    /// Convenience constructor used by tests and mocks.
    pub fn with_bundle(bundle: impl Into<String>) -> Self {
        Self { bundle: bundle.into(), ..Default::default() }
    }
}

/// Highest-weight keywords first; equal weights fall back to text order.
pub fn top_keywords(keywords: &Keywords, count: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &i64)> = keywords.iter().collect();
    ranked.sort_by(|(a_text, a_weight), (b_text, b_weight)| b_weight.cmp(a_weight).then_with(|| a_text.cmp(b_text)));
    ranked.into_iter().take(count).map(|(text, _)| text.clone()).collect()
}
