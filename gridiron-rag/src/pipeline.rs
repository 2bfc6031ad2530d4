//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the full ingest-and-recommend workflow by
//! composing an [`EmbeddingClient`], a [`GenerationClient`], a
//! [`VectorIndex`], a [`Chunker`] and a session [`CostLedger`].
//!
//! A recommendation request walks a small state machine:
//!
//! ```text
//! Embedding -> Retrieving -> Generating -> Done
//!     \            \              \
//!      `------------`--------------`--> Failed
//! ```
//!
//! Every failure carries the [`Stage`] it happened in and the spend already
//! recorded on the ledger.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridiron_rag::{CostLedger, Pricing, RagConfig, RagPipeline, VectorIndex};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::builder().call_budget(1.0).build()?)
//!     .embedding_client(Arc::new(embedder))
//!     .generation_client(Arc::new(llm))
//!     .index(Arc::new(VectorIndex::new()))
//!     .ledger(Arc::new(CostLedger::new(Pricing::gpt_4o())))
//!     .build()?;
//!
//! pipeline.ingest_batch(&documents).await?;
//! let plan = pipeline.recommend("Draft plan for pick 7", "10 teams, half-PPR", None).await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::cost::{CostLedger, UsageKind, estimate_tokens};
use crate::document::{Citation, ScoredSegment};
use crate::embedding::EmbeddingClient;
use crate::error::{BudgetScope, FailureReason, RagError, RecommendError, Result};
use crate::generation::GenerationClient;
use crate::index::VectorIndex;

/// States of a recommendation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Embedding,
    Retrieving,
    Generating,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Generating => "generating",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A cloneable flag a caller sets to abandon a request at the next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tokens billed by one recommendation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUsage {
    pub embedding_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A grounded answer and everything needed to audit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// The generated recommendation text.
    pub answer: String,
    /// The segments placed in the prompt, best first.
    pub segments: Vec<ScoredSegment>,
    /// `(source_id, offset)` provenance of each segment used.
    pub citations: Vec<Citation>,
    /// Tokens billed by this request.
    pub usage: CallUsage,
    /// Cost of this request in USD.
    pub call_cost: f64,
    /// Cumulative session cost in USD after this request.
    pub session_cost: f64,
}

/// Tracks the stage and spend of a single request.
struct Run<'a> {
    ledger: &'a CostLedger,
    stage: Stage,
    usage: CallUsage,
}

impl<'a> Run<'a> {
    fn new(ledger: &'a CostLedger) -> Self {
        Self { ledger, stage: Stage::Embedding, usage: CallUsage::default() }
    }

    fn advance(&mut self, next: Stage) {
        debug!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    fn call_cost(&self) -> f64 {
        self.ledger.estimate_cost(self.usage.embedding_tokens, UsageKind::Embedding)
            + self.ledger.estimate_generation(self.usage.input_tokens, self.usage.output_tokens)
    }

    fn record_embedding(&mut self, tokens: u64) {
        self.ledger.record_embedding(tokens);
        self.usage.embedding_tokens += tokens;
    }

    fn record_generation(&mut self, input_tokens: u64, output_tokens: u64) {
        self.ledger.record_generation(input_tokens, output_tokens);
        self.usage.input_tokens += input_tokens;
        self.usage.output_tokens += output_tokens;
    }

    fn fail(&self, reason: FailureReason) -> RecommendError {
        let call_cost = self.call_cost();
        let session_cost = self.ledger.current_cost();
        error!(
            stage = %self.stage,
            to = %Stage::Failed,
            reason = %reason,
            call_cost,
            session_cost,
            "recommendation failed"
        );
        RecommendError { stage: self.stage, reason, call_cost, session_cost }
    }

    fn check_cancelled(
        &self,
        cancel: &CancellationFlag,
    ) -> std::result::Result<(), RecommendError> {
        if cancel.is_cancelled() {
            return Err(self.fail(FailureReason::Cancelled));
        }
        Ok(())
    }
}

/// Keep the best segments that fit in `budget_chars`, dropping the lowest
/// scored first. The best segment is truncated rather than dropped so the
/// prompt is never left without grounding.
pub fn select_context(retrieved: Vec<ScoredSegment>, budget_chars: usize) -> Vec<ScoredSegment> {
    let mut used = 0;
    let mut selected = Vec::with_capacity(retrieved.len());
    for mut candidate in retrieved {
        let len = candidate.segment.text.chars().count();
        if used + len <= budget_chars {
            used += len;
            selected.push(candidate);
            continue;
        }
        if selected.is_empty() {
            candidate.segment.text = candidate.segment.text.chars().take(budget_chars).collect();
            selected.push(candidate);
        }
        break;
    }
    selected
}

/// Render the final prompt: instructions, numbered context, league settings, request.
pub fn build_prompt(
    system_prompt: &str,
    context: &[ScoredSegment],
    league_context: &str,
    query: &str,
) -> String {
    let mut prompt = String::with_capacity(
        system_prompt.len()
            + query.len()
            + league_context.len()
            + context.iter().map(|s| s.segment.text.len() + 64).sum::<usize>()
            + 64,
    );
    prompt.push_str(system_prompt.trim());
    prompt.push_str("\n\nContext:\n");
    for (i, scored) in context.iter().enumerate() {
        let segment = &scored.segment;
        prompt.push_str(&format!(
            "[{}] (source: {}, offset {})\n{}\n\n",
            i + 1,
            segment.source_id,
            segment.start_offset,
            segment.text.trim()
        ));
    }
    prompt.push_str("League settings:\n");
    let league = league_context.trim();
    prompt.push_str(if league.is_empty() { "Not provided." } else { league });
    prompt.push_str("\n\nRequest:\n");
    prompt.push_str(query.trim());
    prompt
}

/// The RAG pipeline orchestrator.
///
/// Coordinates document ingestion (chunk → embed → index) and recommendation
/// (embed → retrieve → generate). Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    pub(crate) config: RagConfig,
    pub(crate) embedder: Arc<dyn EmbeddingClient>,
    pub(crate) generator: Arc<dyn GenerationClient>,
    pub(crate) index: Arc<VectorIndex>,
    pub(crate) chunker: Arc<dyn Chunker>,
    pub(crate) ledger: Arc<CostLedger>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the vector index.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return a reference to the session cost ledger.
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Produce a grounded recommendation for `query`.
    ///
    /// `league_context` is appended to the prompt verbatim. `k` defaults to
    /// the configured `top_k` and is clamped to the index size.
    ///
    /// # Errors
    ///
    /// Returns a [`RecommendError`] naming the failed stage, the reason, and
    /// the cost incurred so far.
    pub async fn recommend(
        &self,
        query: &str,
        league_context: &str,
        k: Option<usize>,
    ) -> std::result::Result<Recommendation, RecommendError> {
        self.recommend_with_cancel(query, league_context, k, &CancellationFlag::new()).await
    }

    /// Like [`recommend`](Self::recommend), checking `cancel` at every stage boundary.
    ///
    /// Cost already billed before cancellation stays on the ledger and is
    /// reported in the error.
    pub async fn recommend_with_cancel(
        &self,
        query: &str,
        league_context: &str,
        k: Option<usize>,
        cancel: &CancellationFlag,
    ) -> std::result::Result<Recommendation, RecommendError> {
        let mut run = Run::new(&self.ledger);
        let k = k.unwrap_or(self.config.top_k);
        if k == 0 {
            let reason = FailureReason::InvalidConfig("k must be greater than zero".into());
            return Err(run.fail(reason));
        }
        run.check_cancelled(cancel)?;

        // 1. Embed the query
        let inputs = [query];
        let (embedded, attempts) = self
            .config
            .retry
            .run("embed_query", self.embedder.name(), || self.embedder.embed(&inputs))
            .await
            .map_err(|failure| {
                run.fail(FailureReason::EmbeddingUnavailable {
                    attempts: failure.attempts,
                    source: failure.error,
                })
            })?;
        run.record_embedding(embedded.tokens);
        let Some(query_vector) = embedded.vectors.into_iter().next() else {
            return Err(run.fail(FailureReason::EmbeddingUnavailable {
                attempts,
                source: crate::error::ServiceError::InvalidResponse {
                    provider: self.embedder.name().to_string(),
                    message: "no vector returned for the query".to_string(),
                },
            }));
        };
        debug!(attempts, dimensions = query_vector.len(), "query embedded");

        // 2. Retrieve grounding segments
        run.check_cancelled(cancel)?;
        run.advance(Stage::Retrieving);
        let retrieved = match self.index.search(&query_vector, k) {
            Ok(results) => results,
            Err(RagError::EmptyIndex) => return Err(run.fail(FailureReason::NoCorpus)),
            Err(e) => return Err(run.fail(FailureReason::InvalidConfig(e.to_string()))),
        };
        let retrieved_count = retrieved.len();
        let context = select_context(retrieved, self.config.max_context_chars);
        if context.len() < retrieved_count {
            warn!(
                retrieved = retrieved_count,
                kept = context.len(),
                budget = self.config.max_context_chars,
                "context budget dropped low-similarity segments"
            );
        }

        // 3. Check the budget, then generate
        run.check_cancelled(cancel)?;
        run.advance(Stage::Generating);
        let prompt = build_prompt(&self.config.system_prompt, &context, league_context, query);
        let max_output_tokens = self.config.max_output_tokens;
        let estimate = self
            .ledger
            .estimate_generation(estimate_tokens(&prompt), u64::from(max_output_tokens));
        if let Some(ceiling) = self.config.call_budget {
            if estimate > ceiling {
                return Err(run.fail(FailureReason::BudgetExceeded {
                    estimate,
                    ceiling,
                    scope: BudgetScope::Call,
                }));
            }
        }
        if let Some(ceiling) = self.config.session_budget {
            if self.ledger.current_cost() + estimate > ceiling {
                return Err(run.fail(FailureReason::BudgetExceeded {
                    estimate,
                    ceiling,
                    scope: BudgetScope::Session,
                }));
            }
        }
        debug!(estimate, prompt_chars = prompt.len(), "generation pre-flight passed");

        let (generation, attempts) = self
            .config
            .retry
            .run("generate", self.generator.name(), || {
                self.generator.generate(&prompt, max_output_tokens)
            })
            .await
            .map_err(|failure| {
                run.fail(FailureReason::GenerationUnavailable {
                    attempts: failure.attempts,
                    source: failure.error,
                })
            })?;
        run.record_generation(generation.input_tokens, generation.output_tokens);

        run.advance(Stage::Done);
        let call_cost = run.call_cost();
        let session_cost = self.ledger.current_cost();
        info!(
            segments = context.len(),
            attempts,
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            call_cost,
            session_cost,
            "recommendation completed"
        );

        Ok(Recommendation {
            answer: generation.text,
            citations: context.iter().map(|s| s.segment.citation()).collect(),
            segments: context,
            usage: run.usage,
            call_cost,
            session_cost,
        })
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// The embedding client, generation client and ledger are required. The
/// index defaults to an empty [`VectorIndex`] and the chunker to the one
/// described by the config.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    generator: Option<Arc<dyn GenerationClient>>,
    index: Option<Arc<VectorIndex>>,
    chunker: Option<Arc<dyn Chunker>>,
    ledger: Option<Arc<CostLedger>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding client.
    pub fn embedding_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(client);
        self
    }

    /// Set the generation client.
    pub fn generation_client(mut self, client: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(client);
        self
    }

    /// Set the vector index, for example one restored from disk.
    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Override the chunker built from the config.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the session cost ledger.
    pub fn ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Build the [`RagPipeline`], validating the config and required fields.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if a required field is missing or
    /// the config is inconsistent.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder = self
            .embedder
            .ok_or_else(|| RagError::InvalidConfig("embedding_client is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::InvalidConfig("generation_client is required".to_string()))?;
        let ledger =
            self.ledger.ok_or_else(|| RagError::InvalidConfig("ledger is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(config.chunker()?),
        };

        Ok(RagPipeline {
            config,
            embedder,
            generator,
            index: self.index.unwrap_or_default(),
            chunker,
            ledger,
        })
    }
}
