//! Error types for the `gridiron-rag` crate.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that can occur while building, persisting or searching the corpus.
#[derive(Debug, Error)]
pub enum RagError {
    /// A caller supplied inconsistent parameters. Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A search was attempted before any entry was added.
    #[error("Vector index is empty")]
    EmptyIndex,

    /// A scraped record failed validation at the ingestion boundary.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// An external embedding or generation call failed.
    #[error("{source} (after {attempts} attempt(s))")]
    Service {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The last failure observed.
        source: ServiceError,
    },

    /// A segment id is already indexed with different text.
    #[error("Segment '{0}' is already indexed with different text")]
    ConflictingSegment(String),

    /// The persisted index stream is malformed.
    #[error("Index persistence error: {0}")]
    Persistence(String),

    /// An I/O error while reading or writing a persisted index.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A convenience result type for corpus operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Failures reported by an external embedding or generation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// The provider throttled the request (HTTP 429).
    #[error("Rate limited by {provider}: {message}")]
    RateLimited {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Credentials were missing or rejected.
    #[error("Authentication failed for {provider}: {message}")]
    Auth {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The provider was unreachable or returned a server error.
    #[error("{provider} unavailable: {message}")]
    ServiceUnavailable {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The call did not complete within the configured timeout.
    #[error("{provider} timed out after {after:?}")]
    Timeout {
        /// The provider that timed out.
        provider: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The provider answered with something that could not be used.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },
}

impl ServiceError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. }
                | ServiceError::ServiceUnavailable { .. }
                | ServiceError::Timeout { .. }
        )
    }
}

/// Which budget ceiling a pre-flight estimate exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    /// The per-request ceiling.
    Call,
    /// The cumulative session ceiling.
    Session,
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetScope::Call => f.write_str("per-call"),
            BudgetScope::Session => f.write_str("session"),
        }
    }
}

/// Why a recommendation request ended in the `Failed` state.
#[derive(Debug, Error)]
pub enum FailureReason {
    /// The query could not be embedded.
    #[error("embedding unavailable after {attempts} attempt(s): {source}")]
    EmbeddingUnavailable {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure observed.
        source: ServiceError,
    },

    /// There is nothing to ground the answer in.
    #[error("no corpus has been indexed")]
    NoCorpus,

    /// The generation call was refused before being made.
    #[error("estimated generation cost ${estimate:.4} exceeds the {scope} ceiling of ${ceiling:.4}")]
    BudgetExceeded {
        /// The pre-flight estimate in USD.
        estimate: f64,
        /// The ceiling that was exceeded in USD.
        ceiling: f64,
        /// Which ceiling applied.
        scope: BudgetScope,
    },

    /// The generation service failed.
    #[error("generation unavailable after {attempts} attempt(s): {source}")]
    GenerationUnavailable {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure observed.
        source: ServiceError,
    },

    /// The request itself was malformed (for example a query vector of the wrong size).
    #[error("invalid request: {0}")]
    InvalidConfig(String),

    /// The caller cancelled the request at a stage boundary.
    #[error("request cancelled")]
    Cancelled,
}

/// A typed failure of [`RagPipeline::recommend`](crate::RagPipeline::recommend).
///
/// Carries the stage that failed and the spend that already happened, so cost
/// is never hidden from the caller.
#[derive(Debug, Error)]
#[error(
    "recommendation failed during {stage}: {reason} (cost this call ${call_cost:.4}, session ${session_cost:.4})"
)]
pub struct RecommendError {
    /// The stage in which the request failed.
    pub stage: Stage,
    /// Why it failed.
    #[source]
    pub reason: FailureReason,
    /// Cost incurred by this request before the failure, in USD.
    pub call_cost: f64,
    /// Cumulative session cost at the time of the failure, in USD.
    pub session_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        let provider = || "openai".to_string();
        let message = || "x".to_string();
        let transient = [
            ServiceError::RateLimited { provider: provider(), message: message() },
            ServiceError::ServiceUnavailable { provider: provider(), message: message() },
            ServiceError::Timeout { provider: provider(), after: Duration::from_secs(1) },
        ];
        let permanent = [
            ServiceError::Auth { provider: provider(), message: message() },
            ServiceError::InvalidResponse { provider: provider(), message: message() },
        ];
        assert!(transient.iter().all(ServiceError::is_retryable));
        assert!(!permanent.iter().any(ServiceError::is_retryable));
    }

    #[test]
    fn recommend_error_reports_stage_and_spend() {
        let err = RecommendError {
            stage: Stage::Generating,
            reason: FailureReason::BudgetExceeded {
                estimate: 1.5,
                ceiling: 1.0,
                scope: BudgetScope::Call,
            },
            call_cost: 0.0001,
            session_cost: 0.25,
        };
        let text = err.to_string();
        assert!(text.contains("during generating"));
        assert!(text.contains("exceeds the per-call ceiling of $1.0000"));
        assert!(text.contains("session $0.2500"));
    }
}
