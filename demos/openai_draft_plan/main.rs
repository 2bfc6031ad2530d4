//! # OpenAI Draft Plan Example
//!
//! Builds (or reloads) an index over scraped articles with OpenAI embeddings
//! and asks gpt-4o for a draft plan under a per-call budget.
//!
//! Requires `OPENAI_API_KEY` (a `.env` file is honoured).
//!
//! Run: `cargo run -p gridiron-demos --example openai_draft_plan --features openai -- \
//!       --articles demos/data/articles.json --index draft.idx`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gridiron_rag::openai::{OpenAIEmbeddingClient, OpenAIGenerationClient};
use gridiron_rag::{
    ArticleRecord, CostLedger, Pricing, RagConfig, RagPipeline, VectorIndex,
    documents_from_records,
};

#[derive(Parser)]
#[command(about = "Draft plan with OpenAI embeddings and chat completions")]
struct Args {
    /// JSON array of scraped article records.
    #[arg(long)]
    articles: PathBuf,

    /// Persisted index; loaded when present, written after ingestion otherwise.
    #[arg(long)]
    index: Option<PathBuf>,

    #[arg(long, default_value = "12 teams, half-PPR, snake draft")]
    league: String,

    #[arg(long, default_value = "Build me a round-by-round draft plan with sleepers.")]
    query: String,

    /// Per-call generation budget in USD.
    #[arg(long, default_value_t = 0.50)]
    budget: f64,

    /// Use gpt-3.5-turbo pricing and model instead of gpt-4o.
    #[arg(long)]
    cheap: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    gridiron_telemetry::init_telemetry("openai-draft-plan")?;
    let args = Args::parse();

    let (model, pricing) = if args.cheap {
        ("gpt-3.5-turbo", Pricing::gpt_35_turbo())
    } else {
        ("gpt-4o", Pricing::gpt_4o())
    };

    let index = match &args.index {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "loading persisted index");
            Arc::new(VectorIndex::load_from(path)?)
        }
        _ => Arc::new(VectorIndex::new()),
    };
    let needs_ingest = index.is_empty();

    let pipeline = RagPipeline::builder()
        .config(RagConfig::builder().call_budget(args.budget).build()?)
        .embedding_client(Arc::new(OpenAIEmbeddingClient::from_env()?))
        .generation_client(Arc::new(OpenAIGenerationClient::from_env()?.with_model(model)))
        .index(index)
        .ledger(Arc::new(CostLedger::new(pricing)))
        .build()?;

    if needs_ingest {
        let raw = std::fs::read_to_string(&args.articles)
            .with_context(|| format!("reading {}", args.articles.display()))?;
        let records: Vec<ArticleRecord> = serde_json::from_str(&raw)?;
        let (documents, rejected) = documents_from_records(records);
        let estimate = pipeline.estimate_ingest_cost(&documents);
        println!(
            "{} article(s) ({rejected} skipped): {} segments, estimated embedding cost ${:.4}",
            documents.len(),
            estimate.segments,
            estimate.cost
        );
        pipeline.ingest_batch(&documents).await?;
        if let Some(path) = &args.index {
            pipeline.index().save(path)?;
        }
    }

    let plan = pipeline.recommend(&args.query, &args.league, None).await?;
    println!("{}\n", plan.answer);
    println!("Call cost ${:.4}, session cost ${:.4}", plan.call_cost, plan.session_cost);
    Ok(())
}
