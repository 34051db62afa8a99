//! Embedding provider over the OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Fail-soft by contract: any provider or transport failure yields `None`
//! for the affected inputs and the caller degrades to a non-semantic path.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use miga_core::config::EmbeddingsConfig;

use crate::cache::EmbeddingCache;
use crate::normalize::{content_hash, normalize_for_embedding};

/// Largest sub-batch forwarded to the provider in one request.
const MAX_BATCH: usize = 100;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. `None` means "cannot vectorize right now".
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed many texts, preserving input order. A failed input produces
    /// `None` at its index without failing the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;

    fn dimensions(&self) -> u32;
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: u32,
    cache: EmbeddingCache,
}

impl OpenAiEmbedder {
    /// `fallback_api_key` is the LLM key reused when no dedicated one is set.
    pub fn new(cfg: &EmbeddingsConfig, fallback_api_key: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg
                .api_key
                .clone()
                .or_else(|| fallback_api_key.map(String::from)),
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            cache: EmbeddingCache::new(cfg.cache_max_entries, Duration::from_secs(cfg.cache_ttl_secs)),
        }
    }

    /// One provider round-trip for up to [`MAX_BATCH`] normalized inputs.
    async fn request(&self, inputs: &[String]) -> Option<Vec<Vec<f32>>> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                warn!("embeddings api key not configured, skipping semantic path");
                return None;
            }
        };

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "dimensions": self.dimensions,
        });

        let resp = match self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embeddings request failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embeddings API error");
            return None;
        }

        let parsed: ApiResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "embeddings response parse failed");
                return None;
            }
        };

        // Re-order by the returned index field; the API does not guarantee
        // input order.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        for item in parsed.data {
            if let Some(slot) = vectors.get_mut(item.index) {
                *slot = Some(item.embedding);
            }
        }
        if vectors.iter().any(|v| v.is_none()) {
            warn!("embeddings response missing indexes");
            return None;
        }
        Some(vectors.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let normalized = normalize_for_embedding(text);
        if normalized.is_empty() {
            return None;
        }
        let key = content_hash(&normalized);
        if let Some(hit) = self.cache.get(key) {
            debug!(key, "embedding cache hit");
            return Some(hit);
        }

        let vectors = self.request(std::slice::from_ref(&normalized)).await?;
        let vector = vectors.into_iter().next()?;
        self.cache.insert(key, vector.clone());
        Some(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Resolve cache hits first; collect the misses to fetch.
        let mut misses: Vec<(usize, String, u64)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let normalized = normalize_for_embedding(text);
            if normalized.is_empty() {
                continue;
            }
            let key = content_hash(&normalized);
            if let Some(hit) = self.cache.get(key) {
                out[i] = Some(hit);
            } else {
                misses.push((i, normalized, key));
            }
        }

        for chunk in misses.chunks(MAX_BATCH) {
            let inputs: Vec<String> = chunk.iter().map(|(_, t, _)| t.clone()).collect();
            match self.request(&inputs).await {
                Some(vectors) => {
                    for ((i, _, key), vector) in chunk.iter().zip(vectors) {
                        self.cache.insert(*key, vector.clone());
                        out[*i] = Some(vector);
                    }
                }
                // Sub-batch failure leaves those indexes as None.
                None => warn!(size = chunk.len(), "embedding sub-batch failed"),
            }
        }
        out
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<ApiEmbedding>,
}

#[derive(Deserialize)]
struct ApiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            &EmbeddingsConfig {
                api_key: None,
                ..Default::default()
            },
            None,
        )
    }

    #[tokio::test]
    async fn missing_key_degrades_to_none() {
        let e = embedder();
        assert_eq!(e.embed("hola").await, None);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_length() {
        let e = embedder();
        let texts = vec!["a".to_string(), "".to_string(), "b".to_string()];
        let out = e.embed_batch(&texts).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.is_none()));
    }
}
