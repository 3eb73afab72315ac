use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::models::{GenerationRequest, ImageQuality, ImageSize};

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Immutable pricing configuration used by the cost model.
///
/// Rates are USD per million tokens; output prices are USD per image.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    pub text_rate_per_million: f64,
    pub cached_text_rate_per_million: f64,
    pub image_input_rate_per_million: f64,
    pub chars_per_token: f64,
    pub fee_multiplier: f64,
    output: HashMap<(ImageQuality, ImageSize), f64>,
}

impl PricingTable {
    /// Table with rates only; output prices are added with [`PricingTable::with_output_price`]
    pub fn new(
        text_rate_per_million: f64,
        cached_text_rate_per_million: f64,
        image_input_rate_per_million: f64,
        chars_per_token: f64,
        fee_multiplier: f64,
    ) -> Self {
        Self {
            text_rate_per_million,
            cached_text_rate_per_million,
            image_input_rate_per_million,
            chars_per_token,
            fee_multiplier,
            output: HashMap::new(),
        }
    }

    pub fn with_output_price(mut self, quality: ImageQuality, size: ImageSize, usd: f64) -> Self {
        self.output.insert((quality, size), usd);
        self
    }

    /// Per-image output price. `Auto` is billed from the `High` row.
    pub fn output_price(&self, quality: ImageQuality, size: ImageSize) -> Option<f64> {
        self.output.get(&(quality.pricing_tier(), size)).copied()
    }

    pub fn output_prices(&self) -> impl Iterator<Item = (&(ImageQuality, ImageSize), &f64)> {
        self.output.iter()
    }

    /// Price a request. Total function: no I/O, same input gives the same breakdown.
    pub fn estimate_cost(&self, request: &GenerationRequest) -> CostBreakdown {
        let prompt_chars = request.prompt().chars().count() as f64;
        let text_tokens = (prompt_chars / self.chars_per_token).ceil() as u64;

        let cached_tokens = request.cached_text_tokens().unwrap_or(0).min(text_tokens);
        let uncached_tokens = text_tokens - cached_tokens;
        let text_input_cost = (uncached_tokens as f64 / TOKENS_PER_MILLION) * self.text_rate_per_million
            + (cached_tokens as f64 / TOKENS_PER_MILLION) * self.cached_text_rate_per_million;

        let image_input_cost = (request.input_image_tokens() as f64 / TOKENS_PER_MILLION)
            * self.image_input_rate_per_million;

        let (image_output_cost, output_price_missing) =
            match self.output_price(request.quality(), request.size()) {
                Some(per_image) => (per_image * request.count() as f64, false),
                None => {
                    warn!(
                        quality = %request.quality(),
                        size = %request.size(),
                        "No output price for quality/size, pricing output at zero"
                    );
                    (0.0, true)
                }
            };

        let mut breakdown = CostBreakdown {
            text_tokens,
            cached_text_tokens: cached_tokens,
            text_input_cost,
            image_input_cost,
            image_output_cost,
            fee_multiplier: self.fee_multiplier,
            output_price_missing,
            ..CostBreakdown::default()
        };
        breakdown.calculate_total();
        breakdown
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        use ImageQuality::{High, Low, Medium};
        use ImageSize::{Landscape, Portrait, Square};

        Self::new(5.0, 1.25, 10.0, 4.0, 1.2)
            .with_output_price(Low, Square, 0.011)
            .with_output_price(Low, Portrait, 0.016)
            .with_output_price(Low, Landscape, 0.016)
            .with_output_price(Medium, Square, 0.042)
            .with_output_price(Medium, Portrait, 0.063)
            .with_output_price(Medium, Landscape, 0.063)
            .with_output_price(High, Square, 0.167)
            .with_output_price(High, Portrait, 0.25)
            .with_output_price(High, Landscape, 0.25)
    }
}

/// Itemized cost of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub text_tokens: u64,
    pub cached_text_tokens: u64,
    pub text_input_cost: f64,
    pub image_input_cost: f64,
    pub image_output_cost: f64,
    pub fee_multiplier: f64,
    pub subtotal: f64,
    pub total_usd: f64,
    /// Amount charged, in cents
    pub total_charge_cents: i64,
    /// True when the (quality, size) pair had no output price
    pub output_price_missing: bool,
}

impl CostBreakdown {
    /// Calculate subtotal, fee-adjusted total and the integer charge from components
    pub fn calculate_total(&mut self) {
        self.subtotal = self.text_input_cost + self.image_input_cost + self.image_output_cost;
        self.total_usd = self.subtotal * self.fee_multiplier;
        self.total_charge_cents = round_up_to_cents(self.total_usd);

        if !self.output_price_missing && self.total_charge_cents < 1 {
            self.total_charge_cents = 1;
        }
    }
}

/// Round a USD amount up to whole cents.
///
/// A tiny tolerance absorbs float noise so that e.g. 0.020000000000000004 stays at 2 cents.
fn round_up_to_cents(usd: f64) -> i64 {
    let cents = usd * 100.0;
    (cents - 1e-9).ceil().max(0.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_cents() {
        assert_eq!(round_up_to_cents(0.013206), 2);
        assert_eq!(round_up_to_cents(0.02), 2);
        assert_eq!(round_up_to_cents(0.1 + 0.2), 30);
        assert_eq!(round_up_to_cents(0.0), 0);
    }

    #[test]
    fn test_calculate_total() {
        let mut breakdown = CostBreakdown {
            text_input_cost: 0.01,
            image_input_cost: 0.02,
            image_output_cost: 0.07,
            fee_multiplier: 1.5,
            ..CostBreakdown::default()
        };
        breakdown.calculate_total();
        assert!((breakdown.subtotal - 0.10).abs() < 1e-12);
        assert!((breakdown.total_usd - 0.15).abs() < 1e-12);
        assert_eq!(breakdown.total_charge_cents, 15);
    }

    #[test]
    fn test_auto_uses_high_row() {
        let table = PricingTable::default();
        assert_eq!(
            table.output_price(ImageQuality::Auto, ImageSize::Square),
            table.output_price(ImageQuality::High, ImageSize::Square)
        );
    }

    #[test]
    fn test_default_table_is_complete() {
        let table = PricingTable::default();
        for quality in ImageQuality::ALL {
            for size in ImageSize::ALL {
                assert!(table.output_price(quality, size).is_some());
            }
        }
    }
}
