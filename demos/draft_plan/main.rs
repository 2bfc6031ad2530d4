//! # Draft Plan Example
//!
//! Demonstrates the full pipeline: validate scraped articles, estimate the
//! embedding spend, ingest, then ask for a draft recommendation.
//!
//! Uses a deterministic `MockEmbeddingClient` and an echoing
//! `MockGenerationClient` so it runs with **zero API keys**.
//!
//! Run: `cargo run -p gridiron-demos --example draft_plan -- --budget 0.25`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gridiron_rag::{
    ArticleRecord, CostLedger, EmbeddingClient, Embeddings, Generation, GenerationClient,
    Pricing, RagConfig, RagPipeline, ServiceError, VectorIndex, documents_from_records,
    estimate_tokens,
};

#[derive(Parser)]
#[command(about = "Build a draft plan from scraped articles")]
struct Args {
    /// JSON array of scraped article records.
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/data/articles.json"))]
    articles: PathBuf,

    /// Free-form league settings appended to the prompt.
    #[arg(long, default_value = "12 teams, half-PPR, snake draft, picking 7th")]
    league: String,

    /// The request to answer.
    #[arg(long, default_value = "Build me a round-by-round draft plan.")]
    query: String,

    /// Refuse a generation call estimated above this many USD.
    #[arg(long)]
    budget: Option<f64>,

    /// Save the built index here.
    #[arg(long)]
    save_index: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// MockEmbeddingClient: deterministic hash-based embeddings
// ---------------------------------------------------------------------------

struct MockEmbeddingClient {
    dimensions: usize,
}

impl MockEmbeddingClient {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        // Bag of word hashes: texts sharing words point in similar directions.
        let mut emb = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            emb[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        emb
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, texts: &[&str]) -> Result<Embeddings, ServiceError> {
        Ok(Embeddings {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
            tokens: texts.iter().map(|t| estimate_tokens(t)).sum(),
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock-embedding"
    }
}

// ---------------------------------------------------------------------------
// MockGenerationClient: lists the sources it was given
// ---------------------------------------------------------------------------

struct MockGenerationClient;

#[async_trait::async_trait]
impl GenerationClient for MockGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Generation, ServiceError> {
        let sources: Vec<&str> = prompt
            .lines()
            .filter(|line| line.starts_with('[') && line.contains("(source:"))
            .collect();
        let text = format!(
            "Plan grounded in {} passage(s):\n{}",
            sources.len(),
            sources.iter().map(|s| format!("  - {s}")).collect::<Vec<_>>().join("\n")
        );
        Ok(Generation {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text).min(u64::from(max_output_tokens)),
            text,
        })
    }

    fn name(&self) -> &str {
        "mock-generation"
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gridiron_telemetry::init_telemetry("draft-plan")?;
    let args = Args::parse();

    // -- 1. Load and validate scraped records -----------------------------
    let raw = std::fs::read_to_string(&args.articles)
        .with_context(|| format!("reading {}", args.articles.display()))?;
    let records: Vec<ArticleRecord> = serde_json::from_str(&raw)?;
    let (documents, rejected) = documents_from_records(records);
    println!("Loaded {} article(s), skipped {rejected} unusable record(s)", documents.len());

    // -- 2. Configure the pipeline ----------------------------------------
    // Small chunks keep the demo output readable.
    let mut config = RagConfig::builder().chunk_size(200).chunk_overlap(40).top_k(4);
    if let Some(budget) = args.budget {
        config = config.call_budget(budget);
    }
    let pipeline = RagPipeline::builder()
        .config(config.build()?)
        .embedding_client(Arc::new(MockEmbeddingClient { dimensions: 64 }))
        .generation_client(Arc::new(MockGenerationClient))
        .index(Arc::new(VectorIndex::new()))
        .ledger(Arc::new(CostLedger::new(Pricing::gpt_4o())))
        .build()?;

    // -- 3. Estimate, then ingest -----------------------------------------
    let estimate = pipeline.estimate_ingest_cost(&documents);
    println!(
        "Embedding {} segment(s), ~{} tokens, estimated ${:.6}",
        estimate.segments, estimate.tokens, estimate.cost
    );
    let report = pipeline.ingest_batch(&documents).await?;
    println!(
        "Indexed {} segment(s) from {} document(s) using {} embedding tokens",
        report.stored, report.documents, report.embedding_tokens
    );
    if let Some(path) = &args.save_index {
        pipeline.index().save(path)?;
        println!("Saved index to {}", path.display());
    }

    // -- 4. Recommend -----------------------------------------------------
    match pipeline.recommend(&args.query, &args.league, None).await {
        Ok(plan) => {
            println!("\n{}\n", plan.answer);
            for citation in &plan.citations {
                println!("  cited {} @ {}", citation.source_id, citation.start_offset);
            }
            println!(
                "\nThis call: ${:.6} (in {} / out {} tokens). Session: ${:.6}",
                plan.call_cost, plan.usage.input_tokens, plan.usage.output_tokens, plan.session_cost
            );
        }
        Err(e) => {
            println!("\nNo recommendation: {e}");
        }
    }

    let totals = pipeline.ledger().snapshot();
    println!(
        "Session totals: {} embedding, {} input, {} output tokens",
        totals.embedding_tokens, totals.input_tokens, totals.output_tokens
    );
    Ok(())
}
