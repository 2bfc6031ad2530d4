//! Token and dollar accounting for billed calls.
//!
//! A [`CostLedger`] is created per session and shared by reference
//! (`Arc<CostLedger>`) with every component that makes billed calls. Counters
//! are atomics and the dollar total is derived from them, so the reported
//! cost can only grow.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Rough token count for text when a provider does not report usage.
///
/// One token per four characters, rounded down.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / 4
}

/// Unit prices in USD per million tokens.
///
/// Every rate is finite and non-negative. The fields are private and
/// deserialisation goes through [`Pricing::new`], so a ledger priced with
/// this table can never report a falling cost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "PricingRates")]
pub struct Pricing {
    embedding_per_million: f64,
    input_per_million: f64,
    output_per_million: f64,
}

/// Unchecked wire form of [`Pricing`].
#[derive(Deserialize)]
struct PricingRates {
    embedding_per_million: f64,
    input_per_million: f64,
    output_per_million: f64,
}

impl TryFrom<PricingRates> for Pricing {
    type Error = RagError;

    fn try_from(rates: PricingRates) -> Result<Self> {
        Pricing::new(rates.embedding_per_million, rates.input_per_million, rates.output_per_million)
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::gpt_4o()
    }
}

impl Pricing {
    /// Price of `text-embedding-ada-002` embeddings.
    pub const ADA_002_EMBEDDING: f64 = 0.10;

    /// Create a validated price table.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if any rate is negative or not finite.
    pub fn new(
        embedding_per_million: f64,
        input_per_million: f64,
        output_per_million: f64,
    ) -> Result<Self> {
        let pricing = Self { embedding_per_million, input_per_million, output_per_million };
        pricing.validate()?;
        Ok(pricing)
    }

    /// gpt-4o generation with ada-002 embeddings.
    pub fn gpt_4o() -> Self {
        Self {
            embedding_per_million: Self::ADA_002_EMBEDDING,
            input_per_million: 5.0,
            output_per_million: 15.0,
        }
    }

    /// gpt-3.5-turbo generation with ada-002 embeddings.
    pub fn gpt_35_turbo() -> Self {
        Self {
            embedding_per_million: Self::ADA_002_EMBEDDING,
            input_per_million: 0.5,
            output_per_million: 1.5,
        }
    }

    /// Price of embedding input tokens.
    pub fn embedding_per_million(&self) -> f64 {
        self.embedding_per_million
    }

    /// Price of generation prompt tokens.
    pub fn input_per_million(&self) -> f64 {
        self.input_per_million
    }

    /// Price of generation completion tokens.
    pub fn output_per_million(&self) -> f64 {
        self.output_per_million
    }

    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("embedding_per_million", self.embedding_per_million),
            ("input_per_million", self.input_per_million),
            ("output_per_million", self.output_per_million),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(RagError::InvalidConfig(format!(
                    "{name} must be a non-negative finite number, got {rate}"
                )));
            }
        }
        Ok(())
    }

    fn rate(&self, kind: UsageKind) -> f64 {
        match kind {
            UsageKind::Embedding => self.embedding_per_million,
            UsageKind::GenerationInput => self.input_per_million,
            UsageKind::GenerationOutput => self.output_per_million,
        }
    }
}

/// The kind of billed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Embedding,
    GenerationInput,
    GenerationOutput,
}

/// A point-in-time copy of the ledger for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub embedding_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}

/// Session-scoped, monotonically increasing cost ledger.
///
/// # Example
///
/// ```rust,ignore
/// use gridiron_rag::{CostLedger, Pricing, UsageKind};
///
/// let ledger = CostLedger::new(Pricing::gpt_4o());
/// let quote = ledger.estimate_cost(20_000, UsageKind::GenerationInput);
/// ledger.record_generation(20_000, 800);
/// assert!(ledger.current_cost() >= quote);
/// ```
#[derive(Debug, Default)]
pub struct CostLedger {
    pricing: Pricing,
    embedding_tokens: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl CostLedger {
    /// Start a new session with zeroed counters.
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            embedding_tokens: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// The price table this session bills against.
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// Record tokens consumed by an embedding call.
    pub fn record_embedding(&self, tokens: u64) {
        let total = self.embedding_tokens.fetch_add(tokens, Ordering::Relaxed) + tokens;
        debug!(tokens, total_embedding_tokens = total, "recorded embedding usage");
    }

    /// Record tokens consumed by a generation call.
    pub fn record_generation(&self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        debug!(input_tokens, output_tokens, "recorded generation usage");
    }

    /// Cumulative session cost in USD.
    pub fn current_cost(&self) -> f64 {
        self.snapshot().total_cost
    }

    /// Price `tokens` of the given kind without touching the ledger.
    pub fn estimate_cost(&self, tokens: u64, kind: UsageKind) -> f64 {
        tokens as f64 * self.pricing.rate(kind) / TOKENS_PER_MILLION
    }

    /// Price a prospective generation call without touching the ledger.
    pub fn estimate_generation(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.estimate_cost(input_tokens, UsageKind::GenerationInput)
            + self.estimate_cost(output_tokens, UsageKind::GenerationOutput)
    }

    /// Read all counters and the derived cost.
    pub fn snapshot(&self) -> CostSnapshot {
        let embedding_tokens = self.embedding_tokens.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let total_cost = self.estimate_cost(embedding_tokens, UsageKind::Embedding)
            + self.estimate_generation(input_tokens, output_tokens);
        CostSnapshot { embedding_tokens, input_tokens, output_tokens, total_cost }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cost_follows_the_rate_formula() {
        let ledger = CostLedger::new(Pricing::new(0.1, 5.0, 15.0).unwrap());
        ledger.record_embedding(1_000_000);
        ledger.record_generation(200_000, 10_000);
        let expected = 0.1 + 1.0 + 0.15;
        assert!((ledger.current_cost() - expected).abs() < 1e-9);
    }

    #[test]
    fn estimates_do_not_mutate() {
        let ledger = CostLedger::new(Pricing::gpt_4o());
        let estimate = ledger.estimate_cost(1_000, UsageKind::GenerationOutput);
        assert!((estimate - 0.015).abs() < 1e-12);
        assert_eq!(ledger.current_cost(), 0.0);
        assert_eq!(ledger.snapshot().output_tokens, 0);
    }

    #[test]
    fn rejects_negative_rates() {
        assert!(Pricing::new(-0.1, 1.0, 1.0).is_err());
        assert!(Pricing::new(0.1, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn deserialised_pricing_is_validated() {
        let rates = |embedding: f64| {
            serde_json::json!({
                "embedding_per_million": embedding,
                "input_per_million": 5.0,
                "output_per_million": 15.0,
            })
        };
        let err = serde_json::from_value::<Pricing>(rates(-1.0)).unwrap_err();
        assert!(err.to_string().contains("embedding_per_million"));

        assert_eq!(serde_json::from_value::<Pricing>(rates(0.1)).unwrap(), Pricing::gpt_4o());

        let round_trip = serde_json::to_string(&Pricing::gpt_35_turbo()).unwrap();
        assert_eq!(serde_json::from_str::<Pricing>(&round_trip).unwrap(), Pricing::gpt_35_turbo());
    }

    #[test]
    fn token_estimate_rounds_down() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Embed(u64),
        Generate(u64, u64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..1_000_000).prop_map(Op::Embed),
            (0u64..1_000_000, 0u64..100_000).prop_map(|(i, o)| Op::Generate(i, o)),
        ]
    }

    proptest! {
        #[test]
        fn current_cost_never_decreases(
            rates in (0.0f64..100.0, 0.0f64..100.0, 0.0f64..100.0),
            ops in proptest::collection::vec(arb_op(), 0..50),
        ) {
            let ledger = CostLedger::new(Pricing::new(rates.0, rates.1, rates.2).unwrap());
            let mut last = ledger.current_cost();
            for op in ops {
                match op {
                    Op::Embed(t) => ledger.record_embedding(t),
                    Op::Generate(i, o) => ledger.record_generation(i, o),
                }
                let now = ledger.current_cost();
                prop_assert!(now >= last, "cost went from {} to {}", last, now);
                last = now;
            }
        }
    }
}
