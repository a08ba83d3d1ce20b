//! Cost estimation from token usage and a static pricing table.
//!
//! Unknown models return `None`, which renders as "n/a" downstream and never
//! contributes to cost sums.

use std::collections::HashMap;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Prices in USD per million tokens.
static PRICING_TABLE: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        (
            "gpt-4o",
            ModelPricing {
                input_per_million: 2.50,
                output_per_million: 10.00,
            },
        ),
        (
            "gpt-4o-mini",
            ModelPricing {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
        ),
        (
            "claude-sonnet-4-5",
            ModelPricing {
                input_per_million: 3.00,
                output_per_million: 15.00,
            },
        ),
        (
            "claude-haiku-4-5",
            ModelPricing {
                input_per_million: 1.00,
                output_per_million: 5.00,
            },
        ),
    ])
});

/// Dated model variants that share pricing with their base model.
static MODEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("claude-sonnet-4-5-20250929", "claude-sonnet-4-5"),
        ("claude-haiku-4-5-20241022", "claude-haiku-4-5"),
    ])
});

/// Estimate the USD cost of token usage for a model, rounded to 6 decimals.
/// Returns `None` for models missing from the pricing table.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    let resolved = MODEL_ALIASES.get(model).copied().unwrap_or(model);
    let pricing = PRICING_TABLE.get(resolved)?;

    let cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_million
        + (output_tokens as f64 / 1_000_000.0) * pricing.output_per_million;

    Some((cost * 1e6).round() / 1e6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_costs() {
        let cost = estimate_cost("gpt-4o", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn alias_resolves_to_base_pricing() {
        let dated = estimate_cost("claude-sonnet-4-5-20250929", 500_000, 0).unwrap();
        let base = estimate_cost("claude-sonnet-4-5", 500_000, 0).unwrap();
        assert_eq!(dated, base);
    }

    #[test]
    fn unknown_model_is_none_not_zero() {
        assert!(estimate_cost("mystery-model", 1000, 1000).is_none());
    }

    #[test]
    fn zero_tokens_cost_zero() {
        assert_eq!(estimate_cost("gpt-4o-mini", 0, 0), Some(0.0));
    }

    #[test]
    fn cost_is_monotone_in_each_token_count() {
        let base = estimate_cost("gpt-4o", 1000, 1000).unwrap();
        assert!(estimate_cost("gpt-4o", 2000, 1000).unwrap() >= base);
        assert!(estimate_cost("gpt-4o", 1000, 2000).unwrap() >= base);
    }
}
