//! Request bodies for the metadata API and their validation.

use serde::Serialize;

use super::ApiError;

/// Largest result count accepted by the list endpoints.
pub const MAX_COUNT: usize = appscout_core::config::MAX_LIST_COUNT;

/// Longest accepted query, in characters.
const MAX_QUERY_CHARS: usize = 400;

/// Body for `/bundle`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct LookupRequest {
    pub query: String,
    pub hl: String,
    pub gl: String,
}

/// Body for `/mainPage` and `/devapps`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ListRequest {
    pub query: String,
    pub hl: String,
    pub gl: String,
    pub count: usize,
}

/// Body for `/keywords_from`.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeywordsRequest {
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub reviews: String,
    pub keys_count: usize,
    pub lang: String,
}

fn validate_query(query: &str) -> Result<(), ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::InvalidQuery("query cannot be empty".to_string()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(ApiError::InvalidQuery(format!("query too long: {chars} chars (max {MAX_QUERY_CHARS})")));
    }
    Ok(())
}

fn validate_count(count: usize) -> Result<(), ApiError> {
    if !(1..=MAX_COUNT).contains(&count) {
        return Err(ApiError::InvalidCount(count));
    }
    Ok(())
}

impl LookupRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_query(&self.query)
    }
}

impl ListRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_query(&self.query)?;
        validate_count(self.count)
    }
}

impl KeywordsRequest {
    /// At least one text field must carry content.
    pub fn validate(&self) -> Result<(), ApiError> {
        let has_text = [&self.title, &self.description, &self.short_description, &self.reviews]
            .iter()
            .any(|field| !field.trim().is_empty());
        if !has_text {
            return Err(ApiError::InvalidQuery("no text to extract keywords from".to_string()));
        }
        validate_count(self.keys_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_lookup() {
        let req = LookupRequest { query: "com.example.app".into(), hl: "en".into(), gl: "us".into() };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_query() {
        let req = LookupRequest { query: "  ".into(), ..Default::default() };
        assert!(matches!(req.validate(), Err(ApiError::InvalidQuery(_))));
    }

    #[test]
    fn test_query_too_long() {
        let req = ListRequest { query: "a".repeat(401), count: 10, ..Default::default() };
        assert!(matches!(req.validate(), Err(ApiError::InvalidQuery(_))));
    }

    #[test]
    fn test_invalid_count() {
        let req = ListRequest { query: "puzzle".into(), count: 0, ..Default::default() };
        assert!(matches!(req.validate(), Err(ApiError::InvalidCount(0))));

        let req = ListRequest { query: "puzzle".into(), count: MAX_COUNT + 1, ..Default::default() };
        assert!(matches!(req.validate(), Err(ApiError::InvalidCount(_))));
    }

    #[test]
    fn test_keywords_request_needs_text() {
        let req = KeywordsRequest { keys_count: 10, ..Default::default() };
        assert!(matches!(req.validate(), Err(ApiError::InvalidQuery(_))));

        let req = KeywordsRequest { title: "Chess".into(), keys_count: 10, ..Default::default() };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_keywords_wire_names() {
        let req = KeywordsRequest {
            title: "t".into(),
            short_description: "s".into(),
            keys_count: 10,
            lang: "en".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["shortDescription"], "s");
        assert_eq!(json["keysCount"], 10);
        assert_eq!(json["lang"], "en");
    }
}
