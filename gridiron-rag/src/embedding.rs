//! Embedding client trait for turning text into vectors.

use async_trait::async_trait;

use crate::error::ServiceError;

/// Vectors for a batch of inputs plus the tokens the provider billed for them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    /// One vector per input, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Tokens consumed by the request.
    pub tokens: u64,
}

/// A provider that generates fixed-dimension embeddings from text.
///
/// Implementations wrap a specific backend (OpenAI, a local model, a test
/// double) behind one async interface. Calls are billed per token, so the
/// returned [`Embeddings`] must report usage; backends that do not report it
/// should fall back to [`estimate_tokens`](crate::estimate_tokens).
///
/// # Example
///
/// ```rust,ignore
/// use gridiron_rag::EmbeddingClient;
///
/// let out = client.embed(&["Who is the RB1 in Detroit?"]).await?;
/// assert_eq!(out.vectors[0].len(), client.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[&str]) -> Result<Embeddings, ServiceError>;

    /// Return the dimensionality of the vectors this client produces.
    fn dimensions(&self) -> usize;

    /// A short provider name used in logs.
    fn name(&self) -> &str {
        "embedding"
    }
}
