//! # gridiron-rag
//!
//! Retrieval-augmented draft recommendations over a corpus of scraped NFL articles.
//!
//! ## Overview
//!
//! The crate turns raw article text into grounded, cost-tracked answers:
//!
//! - [`BoundaryChunker`] - splits documents into overlapping segments that
//!   prefer paragraph, sentence and line boundaries
//! - [`VectorIndex`] - exact cosine-similarity search with binary persistence
//! - [`CostLedger`] - session-wide token and dollar accounting
//! - [`RetryPolicy`] - bounded backoff and per-call timeouts for billed services
//! - [`RagPipeline`] - ingestion and the embed → retrieve → generate state machine
//!
//! Embedding and generation backends plug in through the [`EmbeddingClient`]
//! and [`GenerationClient`] traits. OpenAI implementations live in the
//! [`openai`] module behind the `openai` feature.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gridiron_rag::openai::{OpenAIEmbeddingClient, OpenAIGenerationClient};
//! use gridiron_rag::{CostLedger, Pricing, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::builder().call_budget(0.50).build()?)
//!     .embedding_client(Arc::new(OpenAIEmbeddingClient::from_env()?))
//!     .generation_client(Arc::new(OpenAIGenerationClient::from_env()?))
//!     .ledger(Arc::new(CostLedger::new(Pricing::gpt_4o())))
//!     .build()?;
//!
//! let estimate = pipeline.estimate_ingest_cost(&documents);
//! println!("embedding will cost about ${:.4}", estimate.cost);
//! pipeline.ingest_batch(&documents).await?;
//!
//! let plan = pipeline
//!     .recommend("Build me a draft plan from pick 7", "12 teams, full PPR", None)
//!     .await?;
//! println!("{}\n(cost ${:.4})", plan.answer, plan.call_cost);
//! ```
//!
//! ## Features
//!
//! - `openai` - OpenAI embedding and chat-completion clients via `reqwest`

pub mod chunking;
pub mod config;
pub mod cost;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod retry;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Boundary, BoundaryChunker, Chunker, chunk};
pub use config::{DEFAULT_SYSTEM_PROMPT, RagConfig, RagConfigBuilder};
pub use cost::{CostLedger, CostSnapshot, Pricing, UsageKind, estimate_tokens};
pub use document::{ArticleRecord, Citation, Document, IndexEntry, ScoredSegment, Segment};
pub use embedding::{EmbeddingClient, Embeddings};
pub use error::{
    BudgetScope, FailureReason, RagError, RecommendError, Result, ServiceError,
};
pub use generation::{Generation, GenerationClient};
pub use index::{DuplicatePolicy, VectorIndex};
pub use ingest::{IngestEstimate, IngestReport, documents_from_records};
pub use pipeline::{
    CallUsage, CancellationFlag, RagPipeline, RagPipelineBuilder, Recommendation, Stage,
    build_prompt, select_context,
};
pub use retry::{RetryFailure, RetryPolicy};
