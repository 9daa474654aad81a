//! Token usage and cost accounting.
//!
//! Adapters turn provider-specific usage payloads into a [`TokenUsage`] and
//! price it against the immutable [`PricingTable`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::core::providers::ProviderKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    pub provider_id: ProviderKind,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provider_payload: Option<Value>,
}

impl TokenUsage {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            prompt_cost: None,
            completion_cost: None,
            total_cost: None,
            provider_id: provider,
            model_id: model.into(),
            raw_provider_payload: None,
        }
    }

    /// Set token counts. A missing total is derived from the two parts.
    pub fn with_tokens(
        mut self,
        prompt: Option<u64>,
        completion: Option<u64>,
        total: Option<u64>,
    ) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self.total_tokens = total.or(match (prompt, completion) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        });
        self
    }

    pub fn with_raw_payload(mut self, payload: Value) -> Self {
        self.raw_provider_payload = Some(payload);
        self
    }

    /// Derive cost fields from token counts.
    ///
    /// `total_cost` is always `prompt_cost + completion_cost` when both exist.
    pub fn priced(mut self, pricing: &PricingTable) -> Self {
        self.prompt_cost = self
            .prompt_tokens
            .and_then(|tokens| pricing.cost(&self.model_id, Direction::Prompt, tokens));
        self.completion_cost = self
            .completion_tokens
            .and_then(|tokens| pricing.cost(&self.model_id, Direction::Completion, tokens));
        self.total_cost = match (self.prompt_cost, self.completion_cost) {
            (Some(p), Some(c)) => Some(p + c),
            (Some(p), None) => Some(p),
            (None, Some(c)) => Some(c),
            (None, None) => None,
        };
        self
    }

    pub fn has_token_counts(&self) -> bool {
        self.prompt_tokens.is_some() || self.completion_tokens.is_some() || self.total_tokens.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prompt,
    Completion,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Prompt => "prompt",
            Direction::Completion => "completion",
        }
    }
}

/// Rates in USD per 1000 tokens keyed `"{model}_{prompt|completion}"`, with
/// `default_prompt` / `default_completion` as the fallback tier.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PricingTable {
    rates: HashMap<String, f64>,
}

static BUILTIN_RATES: LazyLock<HashMap<String, f64>> = LazyLock::new(|| {
    const PRICING_CONTENT: &str = include_str!("../pricing.toml");
    toml::from_str(PRICING_CONTENT).expect("Failed to parse pricing.toml")
});

impl PricingTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }

    /// Embedded rates with `overrides` applied on top.
    pub fn builtin_with_overrides(overrides: &HashMap<String, f64>) -> Self {
        let mut rates = BUILTIN_RATES.clone();
        rates.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        Self { rates }
    }

    pub fn builtin() -> Self {
        Self::builtin_with_overrides(&HashMap::new())
    }

    pub fn rate(&self, model: &str, direction: Direction) -> Option<f64> {
        self.rates
            .get(&format!("{model}_{}", direction.as_str()))
            .or_else(|| self.rates.get(&format!("default_{}", direction.as_str())))
            .copied()
    }

    pub fn cost(&self, model: &str, direction: Direction, tokens: u64) -> Option<f64> {
        self.rate(model, direction)
            .map(|rate| tokens as f64 / 1000.0 * rate)
    }
}
