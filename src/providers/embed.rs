//! OpenAI text embeddings.

use super::{join_endpoint, read_body};
use crate::capability::{CapabilityError, RemoteCapability};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "text-embedding-3-large";
/// Vector length produced by [`DEFAULT_MODEL`].
pub const DEFAULT_DIMENSIONS: usize = 3072;

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    /// Reject vectors of any other length; `None` accepts whatever comes back.
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(client: Client, api_key: String, endpoint: String, model: String) -> Self {
        let dimensions = (model == DEFAULT_MODEL).then_some(DEFAULT_DIMENSIONS);
        Self {
            client,
            api_key,
            endpoint,
            model,
            dimensions,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Pull the first embedding out of a response body, checking its length.
pub fn parse_embedding_response(
    body: &str,
    dimensions: Option<usize>,
) -> Result<Vec<f32>, CapabilityError> {
    let parsed: EmbeddingResponse = serde_json::from_str(body)?;
    let embedding = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| CapabilityError::Malformed("response contains no embedding".into()))?;

    match dimensions {
        Some(expected) if embedding.len() != expected => Err(CapabilityError::Malformed(format!(
            "expected {expected} dimensions, got {}",
            embedding.len()
        ))),
        _ => Ok(embedding),
    }
}

impl RemoteCapability for OpenAiEmbedder {
    type Output = Vec<f32>;

    fn name(&self) -> &'static str {
        "embedding"
    }

    #[instrument(level = "debug", skip_all)]
    async fn call(&self, payload: &str) -> Result<Self::Output, CapabilityError> {
        let resp = self
            .client
            .post(join_endpoint(&self.endpoint, "v1/embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: payload,
                model: &self.model,
            })
            .send()
            .await?;
        let body = read_body(resp).await?;
        parse_embedding_response(&body, self.dimensions)
    }
}
