//! Text embedding via Voyage AI's OpenAI-compatible embeddings endpoint.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ideamine_common::IdeamineError;

/// Embedding dimension produced by voyage-3-large.
pub const EMBEDDING_DIM: usize = 1024;

// --- TextEmbedder trait ---

#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Voyage AI embeddings client. Every returned vector is unit-normalized,
/// so cosine similarity reduces to a dot product downstream.
pub struct VoyageEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl VoyageEmbedder {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: "voyage-3-large".to_string(),
            base_url: "https://api.voyageai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding request rejected")?;

        let mut parsed: EmbeddingResponse =
            response.json().await.context("parsing embedding response")?;
        parsed.data.sort_by_key(|item| item.index);

        if parsed.data.len() != input.len() {
            return Err(IdeamineError::Embedding(format!(
                "response returned {} vectors for {} inputs",
                parsed.data.len(),
                input.len()
            ))
            .into());
        }
        if let Some(item) = parsed.data.iter().find(|i| i.embedding.len() != EMBEDDING_DIM) {
            return Err(IdeamineError::Embedding(format!(
                "expected {EMBEDDING_DIM}-dim vectors, got {}",
                item.embedding.len()
            ))
            .into());
        }

        Ok(parsed
            .data
            .into_iter()
            .map(|item| unit_normalize(item.embedding))
            .collect())
    }
}

#[async_trait::async_trait]
impl TextEmbedder for VoyageEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IdeamineError::Embedding("response was empty".to_string()).into())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(&texts).await
    }
}

/// Scale a vector to unit length. Zero vectors pass through unchanged.
pub fn unit_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_normalize_produces_unit_length() {
        let v = unit_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn unit_normalize_leaves_zero_vector() {
        let v = unit_normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
