//! Brave Web Search.
//!
//! Each payload becomes one query (truncated to 128 characters); the first
//! eight web results are kept.

use super::{join_endpoint, read_body};
use crate::capability::{CapabilityError, RemoteCapability};
use crate::models::SearchResult;
use crate::utils::truncate_chars;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

pub const DEFAULT_ENDPOINT: &str = "https://api.search.brave.com";
/// Longest query sent to the provider, in characters.
pub const MAX_QUERY_CHARS: usize = 128;
/// Results kept per query.
pub const MAX_RESULTS: usize = 8;
const PAGE_AGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct BraveSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl BraveSearch {
    pub fn new(client: Client, api_key: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveHit>,
}

#[derive(Debug, Deserialize)]
struct BraveHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    page_age: Option<String>,
    profile: Option<serde_json::Value>,
    #[serde(default)]
    language: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: String,
}

impl From<BraveHit> for SearchResult {
    fn from(hit: BraveHit) -> Self {
        SearchResult {
            page_age: hit
                .page_age
                .as_deref()
                .and_then(|s| NaiveDateTime::parse_from_str(s, PAGE_AGE_FORMAT).ok()),
            profile: hit
                .profile
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            title: hit.title,
            url: hit.url,
            description: hit.description,
            language: hit.language,
            kind: hit.kind,
            subtype: hit.subtype,
        }
    }
}

/// Parse a web search response body into at most [`MAX_RESULTS`] results.
pub fn parse_search_response(body: &str) -> Result<Vec<SearchResult>, CapabilityError> {
    let parsed: BraveResponse = serde_json::from_str(body)?;
    Ok(parsed
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .take(MAX_RESULTS)
        .map(SearchResult::from)
        .collect())
}

impl RemoteCapability for BraveSearch {
    type Output = Vec<SearchResult>;

    fn name(&self) -> &'static str {
        "search"
    }

    #[instrument(level = "debug", skip_all)]
    async fn call(&self, payload: &str) -> Result<Self::Output, CapabilityError> {
        let query = truncate_chars(payload, MAX_QUERY_CHARS);
        let resp = self
            .client
            .get(join_endpoint(&self.endpoint, "res/v1/web/search"))
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query)])
            .send()
            .await?;
        let body = read_body(resp).await?;
        let results = parse_search_response(&body)?;
        debug!(count = results.len(), "Search returned results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ErrorClass;
    use crate::providers::build_client;
    use crate::testing::http_stub;
    use serde_json::json;
    use std::time::Duration;

    fn brave(endpoint: String) -> BraveSearch {
        let client = build_client(Duration::from_secs(5)).unwrap();
        BraveSearch::new(client, "token".into(), endpoint)
    }

    #[test]
    fn test_parse_caps_results_and_dates() {
        let hits: Vec<_> = (0..12)
            .map(|i| {
                json!({
                    "title": format!("t{i}"),
                    "url": format!("https://example.com/{i}"),
                    "description": "d",
                    "page_age": "2024-03-05T10:20:30",
                    "profile": {"name": "Example"},
                    "language": "zh",
                    "type": "search_result",
                    "subtype": "article"
                })
            })
            .collect();
        let body = json!({"web": {"results": hits}}).to_string();

        let results = parse_search_response(&body).unwrap();

        assert_eq!(results.len(), MAX_RESULTS);
        assert_eq!(results[0].title, "t0");
        assert_eq!(results[7].url, "https://example.com/7");
        assert_eq!(
            results[0].page_age.unwrap().to_string(),
            "2024-03-05 10:20:30"
        );
        assert_eq!(results[0].kind, "search_result");
        assert_eq!(results[0].profile["name"], "Example");
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let body = json!({"web": {"results": [{"url": "https://a", "page_age": "yesterday"}]}})
            .to_string();
        let results = parse_search_response(&body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "");
        assert!(results[0].page_age.is_none());
        assert_eq!(results[0].profile, json!({}));
    }

    #[test]
    fn test_parse_no_web_section() {
        let results = parse_search_response(r#"{"type":"search"}"#).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_search_response("<html>").unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_call_parses_live_response() {
        let body = json!({"web": {"results": [{"title": "t", "url": "https://a"}]}}).to_string();
        let endpoint = http_stub(200, "OK", &body).await;

        let results = brave(endpoint).call("新闻").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://a");
    }

    #[tokio::test]
    async fn test_call_classifies_error_statuses() {
        let limited = brave(http_stub(429, "Too Many Requests", "quota").await)
            .call("q")
            .await
            .unwrap_err();
        assert!(matches!(limited, CapabilityError::RateLimited(_)));
        assert_eq!(limited.class(), ErrorClass::Transient);

        let unauthorized = brave(http_stub(401, "Unauthorized", "").await)
            .call("q")
            .await
            .unwrap_err();
        assert!(matches!(unauthorized, CapabilityError::Http { status: 401, .. }));
        assert_eq!(unauthorized.class(), ErrorClass::Fatal);

        let garbage = brave(http_stub(200, "OK", "<html>").await)
            .call("q")
            .await
            .unwrap_err();
        assert!(matches!(garbage, CapabilityError::Malformed(_)));
    }
}
