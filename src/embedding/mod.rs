//! Embedder client: calls the external embedding endpoint and returns a
//! fixed-dimension vector.

pub mod queue;

pub use queue::{IndexingQueue, IndexingRequest, IndexingWorker};

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{MemoriaError, Result};

/// Trait for embedding generators, so the retriever and indexer don't care
/// whether they're talking to a real HTTP endpoint or a test double.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text. Returns an empty vector on
    /// upstream semantic failure (empty embedding in the response) rather
    /// than an error, matching the "unindexable record" contract.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Known output dimension, if one has been discovered yet from a prior
    /// successful call.
    fn dimensions(&self) -> Option<usize>;
}

/// Generic HTTP embedder speaking the `{model, prompt, stream:false}` /
/// `{embedding: [...]}` contract.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
    dimensions: std::sync::atomic::AtomicUsize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
            dimensions: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.embedder_endpoint.clone(),
            config.embedder_model.clone(),
            config.embed_timeout(),
        )
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text,
                "stream": false,
            }))
            .timeout(self.timeout)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| MemoriaError::Timeout(self.timeout))??;

        if !response.status().is_success() {
            return Err(MemoriaError::Embedder(format!(
                "embedder endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = body["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(MemoriaError::Embedder("empty embedding in response".to_string()));
        }

        // First successful response discovers the canonical dimension;
        // reject subsequent responses of a different length.
        let discovered = self.dimensions.load(std::sync::atomic::Ordering::Relaxed);
        if discovered == 0 {
            self.dimensions
                .store(embedding.len(), std::sync::atomic::Ordering::Relaxed);
        } else if discovered != embedding.len() {
            return Err(MemoriaError::Embedder(format!(
                "embedding dimension changed: expected {discovered}, got {}",
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> Option<usize> {
        match self.dimensions.load(std::sync::atomic::Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }
}

/// Cosine similarity between two raw (not pre-normalized) vectors.
/// Mismatched dimensions or a zero-norm vector yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identity() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn cosine_mismatched_dims_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![1.0, 2.0, -1.0];
        let b = vec![0.5, -0.5, 2.0];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
    }
}
