use creatorpay_schema::{PriceBreakdown, Tier};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

fn default_base_rate() -> f64 {
    1.0
}

fn default_penalty_rate() -> f64 {
    0.5
}

fn default_high_bonus_rate() -> f64 {
    0.2
}

fn default_medium_bonus_rate() -> f64 {
    0.1
}

/// Price-per-1000-views policy. Penalty and bonus rates are fractions of
/// `base_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingPolicy {
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    /// Applied when the product is not mentioned
    #[serde(default = "default_penalty_rate")]
    pub penalty_rate: f64,
    #[serde(default = "default_high_bonus_rate")]
    pub high_bonus_rate: f64,
    #[serde(default = "default_medium_bonus_rate")]
    pub medium_bonus_rate: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            base_rate: default_base_rate(),
            penalty_rate: default_penalty_rate(),
            high_bonus_rate: default_high_bonus_rate(),
            medium_bonus_rate: default_medium_bonus_rate(),
        }
    }
}

impl PricingPolicy {
    pub fn with_base_rate(base_rate: f64) -> Self {
        Self {
            base_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(self.base_rate.is_finite() && self.base_rate > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "pricing.base_rate must be positive, got {}",
                self.base_rate
            )));
        }
        for (name, rate) in [
            ("penalty_rate", self.penalty_rate),
            ("high_bonus_rate", self.high_bonus_rate),
            ("medium_bonus_rate", self.medium_bonus_rate),
        ] {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(CoreError::InvalidInput(format!(
                    "pricing.{name} must be non-negative, got {rate}"
                )));
            }
        }
        Ok(())
    }

    pub fn bonus_rate_for(&self, prominence: Tier) -> f64 {
        match prominence {
            Tier::High => self.base_rate * self.high_bonus_rate,
            Tier::Medium => self.base_rate * self.medium_bonus_rate,
            Tier::Low => 0.0,
        }
    }

    pub fn price(&self, views: u64, product_mentioned: bool, prominence: Tier) -> PriceBreakdown {
        let thousands = views as f64 / 1000.0;
        let penalty_rate = if product_mentioned {
            0.0
        } else {
            self.base_rate * self.penalty_rate
        };
        let bonus_rate = self.bonus_rate_for(prominence);

        let base_payout = round_money(thousands * self.base_rate);
        let penalty = round_money(thousands * penalty_rate);
        let bonus = round_money(thousands * bonus_rate);
        PriceBreakdown {
            number_of_views: views,
            price_per_1k: self.base_rate,
            penalty_rate,
            bonus_rate,
            base_payout,
            penalty,
            bonus,
            final_payout: round_money(base_payout - penalty + bonus),
        }
    }
}

/// Rounds to cents, halves away from zero.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_unmentioned_high_prominence() {
        let breakdown = PricingPolicy::with_base_rate(1.0).price(10_000, false, Tier::High);
        assert_eq!(breakdown.penalty, 5.00);
        assert_eq!(breakdown.bonus, 2.00);
        assert_eq!(breakdown.base_payout, 10.00);
        assert_eq!(breakdown.final_payout, 7.00);
        assert_eq!(breakdown.penalty_rate, 0.5);
        assert_eq!(breakdown.bonus_rate, 0.2);
    }

    #[test]
    fn mentioned_product_has_no_penalty() {
        let breakdown = PricingPolicy::with_base_rate(2.0).price(2_000, true, Tier::Medium);
        assert_eq!(breakdown.penalty, 0.0);
        assert_eq!(breakdown.base_payout, 4.0);
        assert_eq!(breakdown.bonus, 0.4);
        assert_eq!(breakdown.final_payout, 4.4);
    }

    #[test]
    fn low_prominence_has_no_bonus() {
        let breakdown = PricingPolicy::default().price(500, true, Tier::Low);
        assert_eq!(breakdown.bonus, 0.0);
        assert_eq!(breakdown.final_payout, 0.5);
    }

    #[test]
    fn zero_views_pay_nothing() {
        let breakdown = PricingPolicy::default().price(0, false, Tier::High);
        assert_eq!(breakdown.final_payout, 0.0);
        assert!(breakdown.penalty >= 0.0 && breakdown.bonus >= 0.0);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(0.125), 0.13);
        assert_eq!(round_money(-0.125), -0.13);
        assert_eq!(round_money(1.004), 1.0);
    }

    #[test]
    fn custom_rates_are_honoured() {
        let policy = PricingPolicy {
            base_rate: 1.0,
            penalty_rate: 0.25,
            high_bonus_rate: 0.5,
            medium_bonus_rate: 0.0,
        };
        let breakdown = policy.price(4_000, false, Tier::High);
        assert_eq!(breakdown.penalty, 1.0);
        assert_eq!(breakdown.bonus, 2.0);
        assert_eq!(breakdown.final_payout, 5.0);
    }

    #[test]
    fn validate_rejects_bad_rates() {
        assert!(PricingPolicy::default().validate().is_ok());
        assert!(PricingPolicy::with_base_rate(0.0).validate().is_err());
        let policy = PricingPolicy {
            penalty_rate: -0.1,
            ..PricingPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
