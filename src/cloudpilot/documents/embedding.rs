//! Text embedding backends.
//!
//! An index is bound to one embedder for its whole life; reopening an index
//! with a different embedder produces garbage rankings, and nothing here
//! guards against it. [`HashEmbedder`] is the default: deterministic, local,
//! and dependency-free, which also makes it the embedder of choice in tests.
//! [`RemoteEmbedder`] talks to any OpenAI-compatible `/embeddings` endpoint.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Box<dyn Error + Send + Sync>>;

    /// Output dimensionality, constant for the embedder's lifetime.
    fn dimensions(&self) -> usize;
}

/// Deterministic feature-hash embedder.
///
/// Each lowercased alphanumeric token is hashed into one of `dim` buckets
/// with a hash-derived sign, and the resulting vector is L2-normalized so
/// cosine scores are comparable across documents of different lengths.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        HashEmbedder { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(raw);
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        HashEmbedder::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Box<dyn Error + Send + Sync>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dim: usize,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(RemoteEmbedder {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
        })
    }
}

/// Pull embeddings out of an OpenAI-shaped response, reordered by the `index`
/// field since the API does not guarantee input order.
fn parse_embedding_response(json: &Value) -> Result<Vec<Vec<f32>>, Box<dyn Error + Send + Sync>> {
    let data = json["data"]
        .as_array()
        .ok_or("embedding response has no 'data' array")?;
    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for entry in data {
        let index = entry["index"]
            .as_u64()
            .ok_or("embedding entry has no 'index'")?;
        let embedding = entry["embedding"]
            .as_array()
            .ok_or("embedding entry has no 'embedding' array")?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        indexed.push((index, embedding));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, e)| e).collect())
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Box<dyn Error + Send + Sync>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
                "dimensions": self.dim,
            }))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(format!("embedding request failed (HTTP {}): {}", status, body).into());
        }
        parse_embedding_response(&body)
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["restart the billing VM".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedder_separates_unrelated_texts() {
        let embedder = HashEmbedder::default();
        let vectors = embedder
            .embed(&[
                "kubernetes cluster autoscaling policy".to_string(),
                "quarterly travel expense report".to_string(),
            ])
            .await
            .unwrap();
        let dot: f32 = vectors[0]
            .iter()
            .zip(&vectors[1])
            .map(|(a, b)| a * b)
            .sum();
        assert!(dot < 0.5);
    }

    #[test]
    fn embedding_response_is_reordered_by_index() {
        let body = json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let parsed = parse_embedding_response(&body).unwrap();
        assert_eq!(parsed[0], vec![1.0, 0.0]);
        assert_eq!(parsed[1], vec![0.5, 0.5]);
    }

    #[test]
    fn malformed_embedding_response_is_an_error() {
        assert!(parse_embedding_response(&json!({"data": "nope"})).is_err());
    }
}
