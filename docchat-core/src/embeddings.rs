//! Pluggable embedding providers.
//!
//! The pipeline only sees the [`EmbeddingProvider`] trait. Two implementations
//! ship with the crate: a local hashed bag-of-words embedder (always
//! available, deterministic) and an OpenAI-compatible HTTP embedder.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{EmbedderKind, ProviderConfig};
use crate::error::{RagError, Result};
use crate::index::normalize;

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Stable identifier, recorded alongside persisted indexes.
    fn name(&self) -> &str;
}

/// Hashed term-frequency embedder. No network, fully deterministic.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
    name: String,
}

impl LocalEmbedder {
    /// A zero `dimensions` is raised to 1.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("local-tf-{dimensions}"),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = djb2(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        normalize(&mut vector);
        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// OpenAI-compatible `/embeddings` client.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    name: String,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("dims", &self.dims)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        let dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 1536,
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::invalid_config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            name: format!("openai:{model}"),
            model,
            dims,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Override the expected dimension for models missing from the built-in table.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": input,
        });

        debug!(url = %url, model = %self.model, texts = input.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::embedding(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RagError::embedding(format!("Failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(RagError::embedding(format!("HTTP {status}: {text}")));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::embedding(format!("Invalid JSON: {e}")))?;
        let data = json["data"]
            .as_array()
            .ok_or_else(|| RagError::embedding("Response has no `data` array"))?;
        if data.len() != input.len() {
            return Err(RagError::embedding(format!(
                "Requested {} embeddings, received {}",
                input.len(),
                data.len()
            )));
        }

        let mut out: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .ok_or_else(|| RagError::embedding(format!("Item {pos} has no embedding")))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if vector.len() != self.dims {
                return Err(RagError::embedding(format!(
                    "Expected {} dimensions from {}, got {}",
                    self.dims,
                    self.model,
                    vector.len()
                )));
            }
            out.push((index, vector));
        }
        out.sort_by_key(|(index, _)| *index);
        Ok(out.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::embedding("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Construct the embedder selected by `config`.
pub fn create_embedder(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.embedder {
        EmbedderKind::Local => Ok(Arc::new(LocalEmbedder::new(config.local_dimensions))),
        EmbedderKind::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RagError::invalid_config(format!("{} is not set", config.api_key_env))
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                config.embedding_model.clone(),
                config.base_url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
