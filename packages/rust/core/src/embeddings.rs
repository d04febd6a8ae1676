//! Text embeddings for nearest-example lookup.
//!
//! [`OpenAiEmbeddings`] calls an OpenAI-compatible `/embeddings` endpoint;
//! [`NgramEmbedding`] is the offline stand-in used with the `math` model.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use versebatch_pool::OutputSink;
use versebatch_shared::{ModelConfig, OFFLINE_MODEL, Result, RunReport, VersebatchError};

use crate::model::{Pricing, TokenUsage, backoff_delay};

/// Turns text into a unit-length vector.
pub trait EmbeddingClient: Send + Sync + 'static {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

impl<E: EmbeddingClient> EmbeddingClient for Arc<E> {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send {
        (**self).embed(text)
    }
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible embedding APIs, with the same retry policy
/// as the chat client.
pub struct OpenAiEmbeddings {
    client: Client,
    config: ModelConfig,
    api_key: String,
    prompt_tokens: AtomicU64,
}

impl fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("model", &self.config.embedding_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbeddings {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                VersebatchError::config(format!(
                    "model API key not found. Set the {} environment variable.",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| VersebatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            prompt_tokens: AtomicU64::new(0),
        })
    }

    /// Prompt tokens consumed so far.
    pub fn usage(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    async fn attempt(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VersebatchError::Network(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(VersebatchError::model(format!(
                "embedding API returned {status}: {snippet}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| VersebatchError::model(format!("invalid embedding response: {e}")))?;

        let total = self
            .prompt_tokens
            .fetch_add(parsed.usage.prompt, Ordering::Relaxed)
            + parsed.usage.prompt;
        let cost = Pricing::for_model(&self.config.embedding_model).map(|p| {
            TokenUsage {
                prompt: total,
                ..TokenUsage::default()
            }
            .cost(p)
        });
        info!(prompt_tokens = total, cost_usd = ?cost, "embedding usage");

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| VersebatchError::model("embedding response had no data"))
    }
}

impl EmbeddingClient for OpenAiEmbeddings {
    #[instrument(skip_all, fields(model = %self.config.embedding_model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) if attempt < max_attempts => {
                    let delay = backoff_delay(&self.config, attempt);
                    warn!(attempt, max_attempts, ?delay, error = %e, "embedding call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Offline n-gram embedding
// ---------------------------------------------------------------------------

/// Deterministic character 5-gram hashing into 1280 buckets, normalized to
/// unit length. Similar strings get similar vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NgramEmbedding;

impl NgramEmbedding {
    pub const DIMENSIONS: usize = 5 * 256;
    const N: usize = 5;

    pub fn vector(&self, text: &str) -> Vec<f32> {
        // The unit separator guarantees at least one n-gram.
        let chars: Vec<char> = text.chars().chain(['\u{241F}']).collect();
        let grams: Vec<&[char]> = if chars.len() >= Self::N {
            chars.windows(Self::N).collect()
        } else {
            vec![&chars[..]]
        };

        let weight = 1.0 / grams.len() as f64;
        let mut buckets = vec![0.0f64; Self::DIMENSIONS];
        for gram in grams {
            let hash: usize = gram
                .iter()
                .enumerate()
                .map(|(i, c)| (i + 1) * (*c as usize))
                .sum();
            buckets[hash % Self::DIMENSIONS] += weight;
        }

        let norm = buckets.iter().map(|v| v * v).sum::<f64>().sqrt();
        buckets.into_iter().map(|v| (v / norm) as f32).collect()
    }
}

impl EmbeddingClient for NgramEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The embedder matching the configured model.
#[derive(Debug)]
pub enum Embedder {
    OpenAi(OpenAiEmbeddings),
    Ngram(NgramEmbedding),
}

impl Embedder {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        if config.model == OFFLINE_MODEL {
            Ok(Self::Ngram(NgramEmbedding))
        } else {
            Ok(Self::OpenAi(OpenAiEmbeddings::new(config)?))
        }
    }
}

impl EmbeddingClient for Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::OpenAi(client) => client.embed(text).await,
            Self::Ngram(model) => model.embed(text).await,
        }
    }
}

/// Emit the embedding of each line as a JSON array, one per line, in input
/// order.
#[instrument(skip_all, fields(lines = lines.len()))]
pub async fn compute_embeddings<E, S>(
    embedder: &E,
    lines: &[String],
    sink: &S,
) -> Result<RunReport>
where
    E: EmbeddingClient,
    S: OutputSink<String>,
{
    let mut report = RunReport::begin("compute-embeddings");
    for line in lines {
        let embedding = embedder.embed(line).await?;
        let json = serde_json::to_string(&embedding)
            .map_err(|e| VersebatchError::parse(format!("cannot encode embedding: {e}")))?;
        sink.emit(json)?;
        report.succeeded += 1;
    }
    report.items = lines.len();
    Ok(report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use versebatch_pool::CollectingSink;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn norm(v: &[f32]) -> f32 {
        similarity(v, v).sqrt()
    }

    #[test]
    fn ngram_vectors_are_unit_length() {
        for text in ["", "ab", "In the name of God", "بسم الله الرحمن الرحيم"] {
            let v = NgramEmbedding.vector(text);
            assert_eq!(v.len(), NgramEmbedding::DIMENSIONS);
            assert!((norm(&v) - 1.0).abs() < 1e-5, "{text}");
        }
    }

    #[test]
    fn similar_texts_score_higher() {
        let base = NgramEmbedding.vector("Praise be to God, the Lord of all worlds");
        let near = NgramEmbedding.vector("Praise be to God, the Lord of the worlds");
        let far = NgramEmbedding.vector("12 * 7 + 3");
        assert!(similarity(&base, &near) > similarity(&base, &far));
        assert!((similarity(&base, &base) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn compute_embeddings_writes_json_lines() {
        let sink = CollectingSink::new();
        let lines = vec!["one".to_string(), "two".to_string()];
        let report = compute_embeddings(&NgramEmbedding, &lines, &sink).await.unwrap();

        let out = sink.take();
        assert_eq!(out.len(), 2);
        let parsed: Vec<f32> = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed, NgramEmbedding.vector("one"));
        assert_eq!(report.items, 2);
    }

    #[tokio::test]
    async fn openai_embeddings_parse_response_and_track_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-ada-002",
                "input": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.6, 0.8] }],
                "usage": { "prompt_tokens": 3, "total_tokens": 3 }
            })))
            .mount(&server)
            .await;

        let config = ModelConfig {
            base_url: server.uri(),
            max_attempts: 1,
            ..ModelConfig::default()
        };
        let client = OpenAiEmbeddings::with_api_key(&config, "k").unwrap();
        assert_eq!(client.embed("hello").await.unwrap(), vec![0.6, 0.8]);
        client.embed("hello").await.unwrap();
        assert_eq!(client.usage(), 6);
    }

    #[test]
    fn offline_model_selects_ngram_embedding() {
        let config = ModelConfig {
            model: OFFLINE_MODEL.into(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            Embedder::from_config(&config).unwrap(),
            Embedder::Ngram(_)
        ));
    }
}
