//! Generation client trait for producing the final answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// The result of a single completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// The generated text.
    pub text: String,
    /// Prompt tokens billed by the provider.
    pub input_tokens: u64,
    /// Completion tokens billed by the provider.
    pub output_tokens: u64,
}

/// A language model that completes a prompt.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Complete `prompt`, producing at most `max_output_tokens` tokens.
    async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Generation, ServiceError>;

    /// A short provider name used in logs.
    fn name(&self) -> &str {
        "generation"
    }
}
