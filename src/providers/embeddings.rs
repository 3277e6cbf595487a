//! Embedding capability: 768-dimensional unit-norm vectors
//! Local deterministic embedder with caching, plus OpenAI
//! (`dimensions=768`) and Gemini (`outputDimensionality=768`) backends.
//! Selection is config-driven, with automatic remote fallback when the
//! local path fails.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::{DataError, DataResult};

/// Embedding dimensionality used across the knowledge base.
pub const EMBEDDING_DIMENSION: usize = 768;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed text into a unit-norm vector of [`EMBEDDING_DIMENSION`] floats.
    async fn embed(&self, text: &str) -> DataResult<Vec<f32>>;

    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Local embedder: deterministic vectors derived from a content digest.
///
/// Not a semantic model; it keeps the pipeline, KNN plumbing, and tests
/// functional without external credentials. Digest-seeded so vectors are
/// stable across processes, unlike the default hasher.
pub struct LocalHashEmbedder {
    cache: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl LocalHashEmbedder {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0u8; 8]));

        let mut embedding = Vec::with_capacity(EMBEDDING_DIMENSION);
        for i in 0..EMBEDDING_DIMENSION {
            // Linear congruential step for deterministic pseudo-random values
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            let normalized = (seed as f64 / u64::MAX as f64) * 2.0 - 1.0;

            let semantic_factor = match i % 8 {
                0 => text.len() as f64 / 1000.0,
                1 => text.chars().filter(|c| c.is_uppercase()).count() as f64 / 100.0,
                2 => text.chars().filter(|c| c.is_numeric()).count() as f64 / 50.0,
                3 => text.split_whitespace().count() as f64 / 100.0,
                _ => 0.0,
            };

            embedding.push((normalized + semantic_factor * 0.1) as f32);
        }

        l2_normalize(embedding)
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for LocalHashEmbedder {
    async fn embed(&self, text: &str) -> DataResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(DataError::parse_error("empty text for embedding"));
        }

        {
            let cache = self.cache.read().await;
            if let Some(embedding) = cache.get(text) {
                return Ok(embedding.clone());
            }
        }

        let embedding = self.generate(text);

        {
            let mut cache = self.cache.write().await;
            cache.insert(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// OpenAI embeddings with the dimensionality pinned to the KB column.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> DataResult<Vec<f32>> {
        let truncated: String = text.chars().take(8000).collect();
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": truncated,
                "dimensions": EMBEDDING_DIMENSION,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DataError::api_error(
                response.status().as_u16(),
                "OpenAI embeddings request failed",
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let values = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| DataError::parse_error("no embedding in OpenAI response"))?;

        if values.len() != EMBEDDING_DIMENSION {
            return Err(DataError::parse_error(format!(
                "OpenAI returned {} dims, expected {}",
                values.len(),
                EMBEDDING_DIMENSION
            )));
        }

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        Ok(l2_normalize(vector))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Gemini embedContent backend.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            api_key,
            model: "text-embedding-004".to_string(),
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> DataResult<Vec<f32>> {
        let truncated: String = text.chars().take(20000).collect();
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "content": {"parts": [{"text": truncated}]},
                "outputDimensionality": EMBEDDING_DIMENSION,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DataError::api_error(
                response.status().as_u16(),
                "Gemini embeddings request failed",
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let values = body["embedding"]["values"]
            .as_array()
            .ok_or_else(|| DataError::parse_error("no embedding in Gemini response"))?;

        if values.len() != EMBEDDING_DIMENSION {
            return Err(DataError::parse_error(format!(
                "Gemini returned {} dims, expected {}",
                values.len(),
                EMBEDDING_DIMENSION
            )));
        }

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        Ok(l2_normalize(vector))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Primary embedder with an optional fallback path.
pub struct FallbackEmbedder {
    primary: Arc<dyn Embedder>,
    fallback: Option<Arc<dyn Embedder>>,
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    async fn embed(&self, text: &str) -> DataResult<Vec<f32>> {
        match self.primary.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                if let Some(fallback) = &self.fallback {
                    warn!(
                        "Embedder '{}' failed ({}), falling back to '{}'",
                        self.primary.name(),
                        e,
                        fallback.name()
                    );
                    fallback.embed(text).await
                } else {
                    Err(e)
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}

/// Pick the embedder from configuration: OpenAI or Gemini when enabled and
/// keyed, otherwise the local path with a remote fallback when one is
/// configured.
pub fn select_embedder(config: &Config) -> Arc<dyn Embedder> {
    let enrichment = &config.enrichment;

    if enrichment.use_openai_embeddings {
        if let Some(key) = &enrichment.openai_api_key {
            info!("Embeddings provider: OpenAI ({} dims)", EMBEDDING_DIMENSION);
            return Arc::new(OpenAiEmbedder::new(
                enrichment.openai_base_url.clone(),
                key.clone(),
            ));
        }
        warn!("USE_OPENAI_EMBEDDINGS set but OPENAI_API_KEY missing, using local embedder");
    }

    if enrichment.use_gemini_embeddings {
        if let Some(key) = &enrichment.gemini_api_key {
            info!("Embeddings provider: Gemini ({} dims)", EMBEDDING_DIMENSION);
            return Arc::new(GeminiEmbedder::new(key.clone()));
        }
        warn!("USE_GEMINI_EMBEDDINGS set but GEMINI_API_KEY missing, using local embedder");
    }

    let remote_fallback: Option<Arc<dyn Embedder>> = enrichment
        .openai_api_key
        .as_ref()
        .map(|key| {
            Arc::new(OpenAiEmbedder::new(
                enrichment.openai_base_url.clone(),
                key.clone(),
            )) as Arc<dyn Embedder>
        })
        .or_else(|| {
            enrichment
                .gemini_api_key
                .as_ref()
                .map(|key| Arc::new(GeminiEmbedder::new(key.clone())) as Arc<dyn Embedder>)
        });

    info!("Embeddings provider: local ({} dims)", EMBEDDING_DIMENSION);
    Arc::new(FallbackEmbedder {
        primary: Arc::new(LocalHashEmbedder::new()),
        fallback: remote_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_embedding_shape_and_norm() {
        let embedder = LocalHashEmbedder::new();
        let embedding = embedder
            .embed("The market is showing strong bullish sentiment today")
            .await
            .unwrap();

        assert_eq!(embedding.len(), EMBEDDING_DIMENSION);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_local_embedding_deterministic() {
        let embedder = LocalHashEmbedder::new();
        let a = embedder.embed("FOMC holds rates steady").await.unwrap();
        let b = embedder.embed("FOMC holds rates steady").await.unwrap();
        assert_eq!(a, b);

        let other = embedder.embed("earnings beat estimates").await.unwrap();
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn test_local_embedding_cache() {
        let embedder = LocalHashEmbedder::new();
        let _ = embedder.embed("cache me").await.unwrap();
        let _ = embedder.embed("cache me").await.unwrap();
        assert_eq!(embedder.cache_len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let embedder = LocalHashEmbedder::new();
        assert!(embedder.embed("   ").await.is_err());
    }
}
