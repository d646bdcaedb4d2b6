//! Schema Embedder
//!
//! Turns table descriptors and questions into L2-normalized vectors, either
//! through an OpenAI-compatible embeddings API or a local feature-hashing
//! model that needs no network.

use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Embedding collaborator. One output vector per input text, in input order,
/// all of width [`Embedder::dimensions`] and L2-normalized.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Scale `v` to unit length in place. Zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding client using an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Nl2SqlError::Embedding(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| Nl2SqlError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(Nl2SqlError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        result.data.sort_by_key(|d| d.index);
        result
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dims {
                    return Err(Nl2SqlError::Embedding(format!(
                        "Embedding dimension {} doesn't match configured dimension {}",
                        d.embedding.len(),
                        self.dims
                    )));
                }
                let mut v = d.embedding;
                l2_normalize(&mut v);
                Ok(v)
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Tokens are lowercase alphanumeric runs; a trailing plural `s` is dropped
/// from longer tokens so "users" meets the `users` table and `user_id`.
/// Non-ASCII runs (e.g. CJK questions) also contribute each character.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dims];
        for feature in features(text) {
            let bucket = (fnv1a(feature.as_bytes()) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

fn features(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut out = Vec::new();
    for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        if token.is_ascii() {
            let stem = if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
                &token[..token.len() - 1]
            } else {
                token
            };
            out.push(stem.to_string());
        } else {
            out.push(token.to_string());
            if token.chars().count() > 1 {
                out.extend(token.chars().filter(|c| !c.is_ascii()).map(String::from));
            }
        }
    }
    out
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
