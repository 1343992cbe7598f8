//! OpenAI-based embedding client implementation.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{is_retryable_error, retry_backoff, should_retry, Embedder};
use crate::error::ProviderError;

/// Connection settings for [`OpenAiEmbedder`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    /// Bearer token.
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Optional output dimension override.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per batch, including the first.
    pub max_retries: usize,
    /// Max inputs per request.
    pub batch_size: usize,
}

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(config: OpenAiEmbedderConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!config.model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: config.model,
            dimensions: config.dimensions,
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(ProviderError::InvalidRequest(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp.json()?;
                        return parsed.into_vectors(inputs.len());
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, "embedding request throttled, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(ProviderError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "embedding request failed, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.data.len() != expected {
            return Err(ProviderError::Malformed(format!(
                "OpenAI returned {} embeddings for {} inputs",
                self.data.len(),
                expected
            )));
        }
        self.data.sort_by_key(|entry| entry.index);
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
