//! Chat-completion model clients.
//!
//! [`ModelClient`] is the seam pipelines call through. [`OpenAiClient`] talks
//! to an OpenAI-compatible `/chat/completions` endpoint; [`MathModel`] is an
//! offline stand-in that evaluates arithmetic, used for dry runs and tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use versebatch_shared::{ModelConfig, OFFLINE_MODEL, Result, VersebatchError};

use crate::expr;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// A system + user exchange; absent parts are omitted.
    pub fn exchange(system: Option<&str>, user: Option<&str>) -> Vec<Self> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Self::new(Role::System, system));
        }
        if let Some(user) = user {
            messages.push(Self::new(Role::User, user));
        }
        messages
    }
}

/// Token counts reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "prompt_tokens", default)]
    pub prompt: u64,
    #[serde(rename = "completion_tokens", default)]
    pub completion: u64,
    #[serde(rename = "total_tokens", default)]
    pub total: u64,
}

impl TokenUsage {
    fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }

    /// Cost of this usage in dollars, rounded to cents.
    pub fn cost(&self, pricing: Pricing) -> f64 {
        let dollars = self.prompt as f64 * pricing.prompt_per_1k / 1000.0
            + self.completion as f64 * pricing.completion_per_1k / 1000.0;
        (dollars * 100.0).round() / 100.0
    }
}

/// Price per thousand tokens, in US dollars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    /// Known prices by model name; `None` for models without a listed price.
    pub fn for_model(model: &str) -> Option<Self> {
        let (prompt_per_1k, completion_per_1k) = match model {
            "gpt-4" => (0.03, 0.06),
            "gpt-3.5-turbo" => (0.002, 0.002),
            "text-embedding-ada-002" => (0.0004, 0.0),
            OFFLINE_MODEL => (0.0, 0.0),
            _ => return None,
        };
        Some(Self {
            prompt_per_1k,
            completion_per_1k,
        })
    }
}

/// Delay before retry number `attempt` (1-based): doubling from the initial
/// backoff, capped at the maximum.
pub(crate) fn backoff_delay(config: &ModelConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let ms = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

/// One model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A chat-completion model.
pub trait ModelClient: Send + Sync + 'static {
    fn complete(&self, messages: Vec<ChatMessage>)
    -> impl Future<Output = Result<Completion>> + Send;

    /// Ask with an optional system prompt and optional user message and
    /// return only the response text.
    fn query(
        &self,
        system: Option<&str>,
        user: Option<&str>,
    ) -> impl Future<Output = Result<String>> + Send {
        let messages = ChatMessage::exchange(system, user);
        async move { Ok(self.complete(messages).await?.content) }
    }
}

impl<M: ModelClient> ModelClient for Arc<M> {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> impl Future<Output = Result<Completion>> + Send {
        (**self).complete(messages)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    top_p: f32,
    n: u32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for OpenAI-compatible chat completion APIs.
///
/// Failed calls are retried with capped exponential backoff. Token usage is
/// accumulated across all calls made through this client.
pub struct OpenAiClient {
    client: Client,
    config: ModelConfig,
    api_key: String,
    usage: Mutex<TokenUsage>,
}

impl OpenAiClient {
    /// Build a client, reading the API key from the configured env var.
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
            usage: Mutex::new(TokenUsage::default()),
        })
    }

    /// Total token usage so far.
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(&self.config, attempt)
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            top_p: self.config.top_p,
            n: self.config.n,
            messages,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VersebatchError::Network(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(VersebatchError::model(format!(
                "model API returned {status}: {snippet}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VersebatchError::model(format!("invalid model response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| VersebatchError::model("model response had no choices"))?;

        Ok(Completion {
            content,
            usage: parsed.usage,
        })
    }
}

impl ModelClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.config.model, messages = messages.len()))]
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&messages).await {
                Ok(completion) => {
                    let total = {
                        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
                        usage.add(completion.usage);
                        *usage
                    };
                    let cost = Pricing::for_model(&self.config.model).map(|p| total.cost(p));
                    info!(
                        prompt_tokens = total.prompt,
                        completion_tokens = total.completion,
                        total_tokens = total.total,
                        cost_usd = ?cost,
                        "model usage"
                    );
                    return Ok(completion);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, max_attempts, ?delay, error = %e, "model call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Offline math model
// ---------------------------------------------------------------------------

/// Offline model: evaluates each non-empty line of the last message as an
/// arithmetic expression and answers with one result per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct MathModel;

impl MathModel {
    pub fn answer(&self, problems: &str) -> Result<String> {
        let vars = HashMap::new();
        let answers = problems
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                expr::evaluate(line, &vars)
                    .map(expr::format_number)
                    .map_err(|e| VersebatchError::model(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(answers.join("\n"))
    }
}

impl ModelClient for MathModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion> {
        let last = messages
            .last()
            .ok_or_else(|| VersebatchError::model("no messages to answer"))?;
        debug!(problems = %last.content, "math model evaluating");

        Ok(Completion {
            content: self.answer(&last.content)?,
            usage: TokenUsage::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The model selected by configuration.
pub enum Model {
    OpenAi(OpenAiClient),
    Math(MathModel),
}

impl Model {
    /// Pick the offline math model or the HTTP client by model name.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        if config.model == OFFLINE_MODEL {
            Ok(Self::Math(MathModel))
        } else {
            Ok(Self::OpenAi(OpenAiClient::new(config)?))
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::OpenAi(client) => client.usage(),
            Self::Math(_) => TokenUsage::default(),
        }
    }
}

impl ModelClient for Model {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion> {
        match self {
            Self::OpenAi(client) => client.complete(messages).await,
            Self::Math(model) => model.complete(messages).await,
        }
    }
}
