//! Corpus building: chunk → embed → index.

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cost::{UsageKind, estimate_tokens};
use crate::document::{ArticleRecord, Document, IndexEntry};
use crate::error::{RagError, Result, ServiceError};
use crate::pipeline::RagPipeline;

/// Counts reported after ingesting one or more documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Documents processed.
    pub documents: usize,
    /// Segments produced by the chunker.
    pub segments: usize,
    /// Entries actually added to the index (re-ingested segments may be skipped).
    pub stored: usize,
    /// Embedding tokens billed.
    pub embedding_tokens: u64,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.documents += other.documents;
        self.segments += other.segments;
        self.stored += other.stored;
        self.embedding_tokens += other.embedding_tokens;
    }
}

/// Projected embedding spend for a set of documents, computed without any call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestEstimate {
    pub documents: usize,
    pub segments: usize,
    pub tokens: u64,
    /// Projected cost in USD.
    pub cost: f64,
}

/// Validate scraped records into documents.
///
/// Returns the valid documents in input order and the number of rejected records.
pub fn documents_from_records(
    records: impl IntoIterator<Item = ArticleRecord>,
) -> (Vec<Document>, usize) {
    let mut documents = Vec::new();
    let mut rejected = 0;
    for record in records {
        match Document::try_from(record) {
            Ok(document) => documents.push(document),
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "skipping scraped record");
            }
        }
    }
    (documents, rejected)
}

impl RagPipeline {
    /// Chunk, embed and index a single document.
    ///
    /// The document's entries are added to the index in one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Service`] if embedding fails after retries,
    /// [`RagError::InvalidConfig`] if the vectors do not match the index, and
    /// [`RagError::ConflictingSegment`] if the document was indexed before
    /// with different text. Tokens billed before the failure stay on the ledger.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        let (entries, mut report) = self.embed_document(document).await?;
        report.stored = self.index.add(entries)?;
        info!(
            document.source_id = %document.source_id,
            segments = report.segments,
            stored = report.stored,
            "ingested document"
        );
        Ok(report)
    }

    /// Ingest many documents, embedding up to `ingest_concurrency` at a time.
    ///
    /// Entries are added to the index in document order. Ingestion stops at
    /// the first failing document; documents before it remain indexed.
    pub async fn ingest_batch(&self, documents: &[Document]) -> Result<IngestReport> {
        let mut total = IngestReport::default();
        let mut embedded = std::pin::pin!(
            stream::iter(documents)
                .map(|document| self.embed_document(document))
                .buffered(self.config.ingest_concurrency)
        );

        let mut position = 0;
        while let Some(result) = embedded.next().await {
            let document = &documents[position];
            position += 1;
            let (entries, mut report) = result.inspect_err(|e| {
                error!(document.source_id = %document.source_id, error = %e, "ingestion failed");
            })?;
            report.stored = self.index.add(entries)?;
            total.merge(report);
        }

        let cost = self.ledger.estimate_cost(total.embedding_tokens, UsageKind::Embedding);
        info!(
            documents = total.documents,
            segments = total.segments,
            stored = total.stored,
            embedding_tokens = total.embedding_tokens,
            cost,
            "ingestion completed"
        );
        Ok(total)
    }

    /// Project the embedding spend of ingesting `documents` without calling anything.
    pub fn estimate_ingest_cost(&self, documents: &[Document]) -> IngestEstimate {
        let mut estimate = IngestEstimate { documents: documents.len(), ..Default::default() };
        for document in documents {
            let segments = self.chunker.chunk(document);
            estimate.segments += segments.len();
            estimate.tokens += segments.iter().map(|s| estimate_tokens(&s.text)).sum::<u64>();
        }
        estimate.cost = self.ledger.estimate_cost(estimate.tokens, UsageKind::Embedding);
        estimate
    }

    async fn embed_document(&self, document: &Document) -> Result<(Vec<IndexEntry>, IngestReport)> {
        let segments = self.chunker.chunk(document);
        let mut report =
            IngestReport { documents: 1, segments: segments.len(), ..Default::default() };
        let mut entries = Vec::with_capacity(segments.len());

        for batch in segments.chunks(self.config.embed_batch_size) {
            let texts: Vec<&str> = batch.iter().map(|s| s.text.as_str()).collect();
            let (embedded, attempts) = self
                .config
                .retry
                .run("embed_segments", self.embedder.name(), || self.embedder.embed(&texts))
                .await?;
            self.ledger.record_embedding(embedded.tokens);
            report.embedding_tokens += embedded.tokens;

            if embedded.vectors.len() != batch.len() {
                return Err(RagError::Service {
                    attempts,
                    source: ServiceError::InvalidResponse {
                        provider: self.embedder.name().to_string(),
                        message: format!(
                            "expected {} vectors, got {}",
                            batch.len(),
                            embedded.vectors.len()
                        ),
                    },
                });
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embedded.vectors)
                    .map(|(segment, embedding)| IndexEntry { embedding, segment }),
            );
        }

        debug!(
            document.source_id = %document.source_id,
            segments = report.segments,
            embedding_tokens = report.embedding_tokens,
            "embedded document"
        );
        Ok((entries, report))
    }
}
