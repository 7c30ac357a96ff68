//! OpenAI-compatible embeddings backend.
//!
//! Talks to the `/embeddings` endpoint of an OpenAI-style API. Transient
//! failures (HTTP 429, 5xx, transport errors) are retried with bounded
//! exponential backoff up to a configured attempt count; permanent failures
//! (empty input, 4xx other than 429) surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingModelKind;
use crate::types::RagError;

use super::EmbeddingProvider;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_EXP: u32 = 5;

#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: EmbeddingModelKind,
    max_retries: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: EmbeddingModelKind,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, RagError> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config("OpenAI API key must not be empty".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RagError::Config("OpenAI API key contains invalid bytes".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            max_retries,
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: self.model.as_str(),
                input: texts,
            };
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await.map_err(|err| {
                            RagError::embedding_permanent(format!(
                                "failed to parse embedding response: {err}"
                            ))
                        })?;
                        return self.extract_vectors(parsed, texts.len());
                    }
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if retryable_status(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        warn!(
                            status = %status,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "embedding request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let error = RagError::Embedding {
                        message: format!("embedding request failed ({status}): {body}"),
                        retryable: retryable_status(status),
                    };
                    return Err(error);
                }
                Err(err) => {
                    if retryable_transport(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        warn!(
                            error = %err,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "embedding transport error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(RagError::Embedding {
                        message: format!("embedding transport error: {err}"),
                        retryable: retryable_transport(&err),
                    });
                }
            }
        }
    }

    fn extract_vectors(
        &self,
        mut parsed: EmbeddingResponse,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        if parsed.data.len() != expected {
            return Err(RagError::embedding_permanent(format!(
                "backend returned {} embeddings for {} inputs",
                parsed.data.len(),
                expected
            )));
        }
        // The API may return entries out of order; `index` is authoritative.
        parsed.data.sort_by_key(|entry| entry.index);
        let dimension = self.dimension();
        let mut vectors = Vec::with_capacity(parsed.data.len());
        for entry in parsed.data {
            if entry.embedding.len() != dimension {
                return Err(RagError::embedding_permanent(format!(
                    "backend returned a {}-dimensional vector, expected {dimension}",
                    entry.embedding.len()
                )));
            }
            vectors.push(entry.embedding);
        }
        debug!(count = vectors.len(), dimension, "embedded batch");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_many(&batch).await?;
        // embed_many guarantees exactly one vector per input.
        Ok(vectors.remove(0))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(position) = texts.iter().position(|text| text.trim().is_empty()) {
            return Err(RagError::embedding_permanent(format!(
                "cannot embed empty text (input {position})"
            )));
        }
        self.request_batch(texts).await
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

fn backoff(attempt: usize) -> Duration {
    let capped = (attempt as u32).min(BACKOFF_CAP_EXP);
    Duration::from_millis(BACKOFF_BASE_MS * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}
