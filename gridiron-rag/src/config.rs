//! Configuration for ingestion and recommendation.

use serde::{Deserialize, Serialize};

use crate::chunking::{Boundary, BoundaryChunker};
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Default system instructions for the draft assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an NFL fantasy draft assistant. \
Base every recommendation on the numbered context passages below, which were scraped from \
recent news, injury reports, depth charts and ADP/ECR rankings. Prefer the newest source when \
passages conflict and flag any player whose value depends on pending news as RISK. Cite the \
passages you rely on by their bracketed number. If the context does not cover something, say \
so instead of guessing. Produce tiered positional boards, a round-by-round plan with primary \
targets, backups and an emergency pivot, late-round sleepers, and a short pre-draft news \
checklist. Keep the whole plan under 1,000 words.";

/// Configuration parameters for the ingestion and recommendation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum segment length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive segments.
    pub chunk_overlap: usize,
    /// Boundary precedence used when cutting segments, highest first.
    pub boundaries: Vec<Boundary>,
    /// Segments per embedding request during ingestion.
    pub embed_batch_size: usize,
    /// Documents chunked and embedded concurrently during ingestion.
    pub ingest_concurrency: usize,
    /// Segments retrieved when the caller does not pass `k`.
    pub top_k: usize,
    /// Upper bound on retrieved context placed in the prompt, in characters.
    pub max_context_chars: usize,
    /// Completion token limit passed to the generation client.
    pub max_output_tokens: u32,
    /// Refuse a generation call whose estimate exceeds this many USD.
    pub call_budget: Option<f64>,
    /// Refuse a generation call that would push the session past this many USD.
    pub session_budget: Option<f64>,
    /// System instructions placed at the top of every prompt.
    pub system_prompt: String,
    /// Retry policy for embedding and generation calls.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            boundaries: Boundary::DEFAULT_PRECEDENCE.to_vec(),
            embed_batch_size: 64,
            ingest_concurrency: 4,
            top_k: 10,
            max_context_chars: 12_000,
            max_output_tokens: 1_500,
            call_budget: None,
            session_budget: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Build the chunker described by this configuration.
    pub fn chunker(&self) -> Result<BoundaryChunker> {
        BoundaryChunker::with_precedence(
            self.chunk_size,
            self.chunk_overlap,
            self.boundaries.clone(),
        )
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if:
    /// - `chunk_size` or `chunk_overlap` is zero, or `chunk_overlap >= chunk_size`
    /// - `top_k`, `embed_batch_size`, `ingest_concurrency`, `max_context_chars`
    ///   or `max_output_tokens` is zero
    /// - a budget is negative or not finite
    /// - the retry policy is invalid
    pub fn validate(&self) -> Result<()> {
        self.chunker()?;
        for (name, value) in [
            ("top_k", self.top_k),
            ("embed_batch_size", self.embed_batch_size),
            ("ingest_concurrency", self.ingest_concurrency),
            ("max_context_chars", self.max_context_chars),
            ("max_output_tokens", self.max_output_tokens as usize),
        ] {
            if value == 0 {
                return Err(RagError::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        let budgets = [("call_budget", self.call_budget), ("session_budget", self.session_budget)];
        for (name, budget) in budgets {
            if let Some(budget) = budget {
                if !budget.is_finite() || budget < 0.0 {
                    return Err(RagError::InvalidConfig(format!(
                        "{name} must be a non-negative amount, got {budget}"
                    )));
                }
            }
        }
        self.retry.validate()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum segment length in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive segments in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the boundary precedence, highest first.
    pub fn boundaries(mut self, boundaries: Vec<Boundary>) -> Self {
        self.config.boundaries = boundaries;
        self
    }

    /// Set the number of segments per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set how many documents are processed concurrently during ingestion.
    pub fn ingest_concurrency(mut self, concurrency: usize) -> Self {
        self.config.ingest_concurrency = concurrency;
        self
    }

    /// Set the default number of segments to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the context budget in characters.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the completion token limit.
    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.config.max_output_tokens = tokens;
        self
    }

    /// Set the per-call budget ceiling in USD.
    pub fn call_budget(mut self, usd: f64) -> Self {
        self.config.call_budget = Some(usd);
        self
    }

    /// Set the session budget ceiling in USD.
    pub fn session_budget(mut self, usd: f64) -> Self {
        self.config.session_budget = Some(usd);
        self
    }

    /// Replace the system instructions.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Set the retry policy for external calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
