// src/embedding/openai.rs
//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::DedupeError;
use crate::models::matching::Vector;
use crate::utils::dedupe_config::EmbeddingConfig;

/// One request per text; retries live in [`crate::embedding::embed_with_retry`].
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DedupeError::InvalidConfig("missing OPENAI_API_KEY".to_string()))?;
        anyhow::ensure!(!config.model_id.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embeddings HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            model: config.model_id.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vector, DedupeError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(resp) => resp,
            Err(err) if is_retryable_error(&err) => {
                return Err(DedupeError::TransientProvider {
                    attempts: 1,
                    message: err.to_string(),
                })
            }
            Err(err) => return Err(DedupeError::Provider(err.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("embeddings request failed ({}): {}", status, body);
            return Err(if is_retryable_status(status) {
                DedupeError::TransientProvider {
                    attempts: 1,
                    message,
                }
            } else {
                DedupeError::Provider(message)
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            DedupeError::TransientProvider {
                attempts: 1,
                message: format!("failed to parse embeddings response: {}", e),
            }
        })?;
        parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| DedupeError::Provider("embeddings response contained no data".to_string()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
