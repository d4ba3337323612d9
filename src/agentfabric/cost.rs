//! Token cost accounting.
//!
//! A [`CostCalculator`] maps model identifiers to per-million-token prices
//! and turns a [`UsageRecord`] into a [`CostBreakdown`].  The pricing table
//! is read-mostly: lookups take the read lock and return a *copy* of the
//! entry so callers can never mutate the shared table through the result.

use crate::agentfabric::client_wrapper::Usage;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::RwLock;

/// Prices in USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cached: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cached_per_million: cached,
        }
    }

    /// Zero-cost pricing used for unknown models.
    pub const fn free() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Token counts for one billing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageRecord {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cached_tokens: usize,
}

impl From<&Usage> for UsageRecord {
    fn from(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cached_tokens: 0,
        }
    }
}

/// Itemized cost of one billing event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cached_cost: f64,
    pub total_cost: f64,
}

lazy_static! {
    static ref DEFAULT_PRICING: HashMap<String, ModelPricing> = {
        let mut table = HashMap::new();
        table.insert("gpt-4.1".to_string(), ModelPricing::new(2.0, 8.0, 0.5));
        table.insert("gpt-4.1-mini".to_string(), ModelPricing::new(0.4, 1.6, 0.1));
        table.insert("gpt-4o".to_string(), ModelPricing::new(2.5, 10.0, 1.25));
        table.insert(
            "claude-sonnet-4-20250514".to_string(),
            ModelPricing::new(3.0, 15.0, 0.3),
        );
        table.insert(
            "claude-haiku-3-5".to_string(),
            ModelPricing::new(0.8, 4.0, 0.08),
        );
        table.insert("grok-3".to_string(), ModelPricing::new(3.0, 15.0, 0.75));
        table.insert(
            "gemini-2.5-flash".to_string(),
            ModelPricing::new(0.3, 2.5, 0.075),
        );
        table
    };
}

/// Thread-safe pricing table plus the cost arithmetic.
pub struct CostCalculator {
    pricing: RwLock<HashMap<String, ModelPricing>>,
}

impl CostCalculator {
    /// Calculator seeded with the built-in default table.
    pub fn new() -> Self {
        Self {
            pricing: RwLock::new(DEFAULT_PRICING.clone()),
        }
    }

    /// Empty calculator; every model is unknown until `set_pricing` is called.
    pub fn empty() -> Self {
        Self {
            pricing: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert the pricing for one model.
    pub fn set_pricing(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.pricing.write().unwrap().insert(model.into(), pricing);
    }

    /// Pricing for `model`, copied out of the table.  Unknown models price
    /// as [`ModelPricing::free`].
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        self.pricing
            .read()
            .unwrap()
            .get(model)
            .copied()
            .unwrap_or_else(ModelPricing::free)
    }

    /// Cost of one usage record under `model`'s pricing.
    ///
    /// The identity `total_cost == input_cost + output_cost + cached_cost`
    /// holds for any nonnegative usage.
    pub fn calculate(&self, model: &str, usage: &UsageRecord) -> CostBreakdown {
        let pricing = self.pricing_for(model);
        let per_token = 1.0 / 1_000_000.0;
        let input_cost = usage.input_tokens as f64 * pricing.input_per_million * per_token;
        let output_cost = usage.output_tokens as f64 * pricing.output_per_million * per_token;
        let cached_cost = usage.cached_tokens as f64 * pricing.cached_per_million * per_token;
        CostBreakdown {
            input_cost,
            output_cost,
            cached_cost,
            total_cost: input_cost + output_cost + cached_cost,
        }
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new()
    }
}
