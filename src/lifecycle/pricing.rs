use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::delivery::Pricing;

/// Fee policy applied when a company confirms without choosing a price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingDefaults {
    pub fee_rate: f64,
    pub fallback_fee: f64,
}

impl Default for PricingDefaults {
    fn default() -> Self {
        Self {
            fee_rate: 0.10,
            fallback_fee: 5000.0,
        }
    }
}

impl PricingDefaults {
    pub fn fixed_fee(&self, total: Option<f64>) -> f64 {
        let fee = total.unwrap_or(0.0) * self.fee_rate;
        if fee.is_finite() && fee > 0.0 {
            fee
        } else {
            self.fallback_fee
        }
    }

    pub fn default_pricing(&self, total: Option<f64>) -> Pricing {
        Pricing::Fixed {
            fixed_price: self.fixed_fee(total),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricingOptions {
    #[serde(default)]
    pub bid_enabled: bool,
    #[serde(default)]
    pub fixed_price: Option<f64>,
    #[serde(default)]
    pub min_bid_price: Option<f64>,
}

fn validated(label: &str, value: Option<f64>) -> Result<Option<f64>, AppError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AppError::BadRequest(format!(
            "{label} must be a non-negative number"
        ))),
        other => Ok(other),
    }
}

impl PricingOptions {
    /// Pricing to publish with. The chosen mode replaces the previous value
    /// entirely; bids survive only when bidding stays on.
    pub fn resolve(
        &self,
        previous: Option<&Pricing>,
        fallback: Pricing,
    ) -> Result<Pricing, AppError> {
        let fixed_price = validated("fixedPrice", self.fixed_price)?;
        let min_bid_price = validated("minBidPrice", self.min_bid_price)?;

        if self.bid_enabled {
            let (previous_min, bids) = match previous {
                Some(Pricing::Bidding { min_bid_price, bids }) => (Some(*min_bid_price), bids.clone()),
                _ => (None, Vec::new()),
            };
            return Ok(Pricing::Bidding {
                min_bid_price: min_bid_price.or(previous_min).unwrap_or(0.0),
                bids,
            });
        }

        let fixed_price = match (fixed_price, previous) {
            (Some(price), _) => price,
            (None, Some(Pricing::Fixed { fixed_price })) => *fixed_price,
            (None, _) => match fallback {
                Pricing::Fixed { fixed_price } => fixed_price,
                Pricing::Bidding { min_bid_price, .. } => min_bid_price,
            },
        };
        Ok(Pricing::Fixed { fixed_price })
    }
}
