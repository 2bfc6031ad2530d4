//! OpenAI embedding and chat-completion clients.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cost::estimate_tokens;
use crate::embedding::{EmbeddingClient, Embeddings};
use crate::error::{RagError, Result, ServiceError};
use crate::generation::{Generation, GenerationClient};

const PROVIDER: &str = "OpenAI";

/// The default OpenAI embeddings API endpoint.
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// The default OpenAI chat completions endpoint.
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default model for OpenAI embeddings.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// The dimensionality of `text-embedding-ada-002`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// The default chat model.
const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

fn api_key_from_env() -> Result<String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| {
        RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".into())
    })
}

fn require_key(api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(RagError::InvalidConfig("API key must not be empty".into()));
    }
    Ok(api_key)
}

/// Map a transport failure onto the retry taxonomy.
fn transport_error(e: reqwest::Error) -> ServiceError {
    error!(provider = PROVIDER, error = %e, "request failed");
    ServiceError::ServiceUnavailable {
        provider: PROVIDER.into(),
        message: format!("request failed: {e}"),
    }
}

/// Read a non-success response into the matching [`ServiceError`].
async fn status_error(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    let message = format!("API returned {status}: {message}");
    error!(provider = PROVIDER, %status, "API error");

    let provider = PROVIDER.to_string();
    match status.as_u16() {
        429 => ServiceError::RateLimited { provider, message },
        401 | 403 => ServiceError::Auth { provider, message },
        s if s >= 500 => ServiceError::ServiceUnavailable { provider, message },
        _ => ServiceError::InvalidResponse { provider, message },
    }
}

fn parse_error(e: reqwest::Error) -> ServiceError {
    error!(provider = PROVIDER, error = %e, "failed to parse response");
    ServiceError::InvalidResponse {
        provider: PROVIDER.into(),
        message: format!("failed to parse response: {e}"),
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// An [`EmbeddingClient`] backed by the OpenAI embeddings API.
///
/// Uses `reqwest` to call the `/v1/embeddings` endpoint directly. Timeouts
/// and retries are applied by the caller's [`RetryPolicy`](crate::RetryPolicy).
///
/// # Example
///
/// ```rust,ignore
/// use gridiron_rag::openai::OpenAIEmbeddingClient;
///
/// let client = OpenAIEmbeddingClient::from_env()?;
/// let out = client.embed(&["Who starts at RB for Detroit?"]).await?;
/// ```
pub struct OpenAIEmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingClient {
    /// Create a new client with the given API key and the ada-002 model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: require_key(api_key.into())?,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a new client using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the model name (e.g. `text-embedding-3-small`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request truncated vectors of `dims` dimensions (text-embedding-3 models only).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    prompt_tokens: u64,
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, texts: &[&str]) -> std::result::Result<Embeddings, ServiceError> {
        if texts.is_empty() {
            return Ok(Embeddings { vectors: Vec::new(), tokens: 0 });
        }
        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(parse_error)?;
        parsed.data.sort_by_key(|d| d.index);
        let tokens = match parsed.usage {
            Some(usage) => usage.prompt_tokens,
            None => texts.iter().map(|t| estimate_tokens(t)).sum(),
        };
        Ok(Embeddings { vectors: parsed.data.into_iter().map(|d| d.embedding).collect(), tokens })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// A [`GenerationClient`] backed by the OpenAI chat completions API.
pub struct OpenAIGenerationClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAIGenerationClient {
    /// Create a new client with the given API key and the gpt-4o model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: require_key(api_key.into())?,
            model: DEFAULT_CHAT_MODEL.into(),
            temperature: 0.7,
        })
    }

    /// Create a new client using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the chat model name (e.g. `gpt-3.5-turbo`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl GenerationClient for OpenAIGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> std::result::Result<Generation, ServiceError> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            prompt_len = prompt.len(),
            "chat completion"
        );

        let request_body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            max_tokens: max_output_tokens,
            temperature: self.temperature,
        };
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let parsed: ChatResponse = response.json().await.map_err(parse_error)?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse {
                provider: PROVIDER.into(),
                message: "response contained no message content".into(),
            })?;
        let (input_tokens, output_tokens) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (estimate_tokens(prompt), estimate_tokens(&text)),
        };
        Ok(Generation { text, input_tokens, output_tokens })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
