//! Page content through the Jina reader proxy (`https://r.jina.ai/<url>`).

use super::{join_endpoint, read_body};
use crate::capability::{CapabilityError, RemoteCapability};
use reqwest::Client;
use tracing::{debug, instrument};

pub const DEFAULT_ENDPOINT: &str = "https://r.jina.ai";

#[derive(Debug, Clone)]
pub struct JinaReader {
    client: Client,
    endpoint: String,
}

impl JinaReader {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// The proxied address for `url`.
    pub fn reader_url(&self, url: &str) -> String {
        join_endpoint(&self.endpoint, url)
    }
}

impl RemoteCapability for JinaReader {
    type Output = String;

    fn name(&self) -> &'static str {
        "crawl"
    }

    #[instrument(level = "debug", skip_all, fields(url = %payload))]
    async fn call(&self, payload: &str) -> Result<Self::Output, CapabilityError> {
        if payload.trim().is_empty() {
            return Err(CapabilityError::Fatal("empty url".into()));
        }
        let resp = self.client.get(self.reader_url(payload)).send().await?;
        let body = read_body(resp).await?;
        debug!(bytes = body.len(), "Crawled page");
        Ok(body)
    }
}
