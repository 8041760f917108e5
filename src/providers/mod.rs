//! Concrete remote capabilities.
//!
//! Each provider implements [`RemoteCapability`](crate::capability::RemoteCapability)
//! over an injected [`reqwest::Client`]; none of them retries on its own.
//!
//! | Capability | Module | Service | Output |
//! |------------|--------|---------|--------|
//! | search | [`search`] | Brave Web Search | up to 8 [`SearchResult`](crate::models::SearchResult)s |
//! | embedding | [`embed`] | OpenAI embeddings | `Vec<f32>` |
//! | crawl | [`crawl`] | Jina reader proxy | page text |
//! | expand | [`expand`] | OpenAI chat completions | generated text |

pub mod crawl;
pub mod embed;
pub mod expand;
pub mod search;

use crate::capability::CapabilityError;
use crate::utils::truncate_for_log;
use reqwest::{Client, Response};
use std::time::Duration;
use url::Url;

/// Characters of an error body kept in [`CapabilityError::Http`].
const ERROR_BODY_CHARS: usize = 300;

/// The shared HTTP client handed to every provider.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Read the body of a response, turning non-success statuses into errors.
pub(crate) async fn read_body(resp: Response) -> Result<String, CapabilityError> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(CapabilityError::from_status(
            status,
            truncate_for_log(&body, ERROR_BODY_CHARS),
        ))
    }
}

/// Check that an endpoint override is an absolute http(s) URL.
pub fn parse_endpoint(endpoint: &str) -> Result<String, String> {
    let url = Url::parse(endpoint).map_err(|e| format!("invalid endpoint `{endpoint}`: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(endpoint.to_string()),
        other => Err(format!("endpoint `{endpoint}` uses unsupported scheme `{other}`")),
    }
}

/// Join `path` onto `endpoint` without doubling or dropping slashes.
pub(crate) fn join_endpoint(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
