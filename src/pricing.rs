// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pricing Tier Resolver
//!
//! Pure mapping from cumulative token volume, model identity, and an
//! admin-configured markup to an effective unit price per 1K tokens.
//!
//! All money math is fixed-point [`Decimal`]; floats never touch a billing
//! path. Identical inputs always produce the identical rounded output.
//!
//! Tier ranges are half-open `[low, high)`: a volume sitting exactly on a
//! boundary belongs to the upper tier.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;

/// Decimal places retained on computed prices.
const PRICE_SCALE: u32 = 6;

/// Markup percentage ceiling. Requests above this are clamped, not rejected.
const MAX_MARKUP_PCT: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

/// A token-volume bracket with its own base price and discount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTier {
    pub name: String,
    /// Inclusive lower bound of the bracket, in cumulative tokens.
    pub token_range_low: u64,
    /// Exclusive upper bound. `u64::MAX` marks the open-ended top tier.
    pub token_range_high: u64,
    pub base_price_per_1k: Decimal,
    /// Fraction in `[0, 1)` subtracted from the marked-up model price.
    pub volume_discount: Decimal,
}

/// Per-model price weighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMultiplier {
    pub model_id: String,
    pub multiplier: Decimal,
}

/// Errors raised by tier-table validation at construction time.
#[derive(Debug, thiserror::Error)]
pub enum PricingConfigError {
    #[error("no pricing tiers configured")]
    Empty,

    #[error("pricing tiers must start at zero (first tier starts at {0})")]
    GapAtZero(u64),

    #[error("tier \"{name}\" starts at {start} but the previous tier ends at {expected}")]
    Gap {
        name: String,
        start: u64,
        expected: u64,
    },

    #[error("tier \"{0}\" has an empty token range")]
    EmptyRange(String),

    #[error("the final tier must be open-ended (ends at {0})")]
    BoundedTop(u64),

    #[error("volume discount for tier \"{0}\" must be within [0, 1)")]
    BadDiscount(String),
}

/// Validated pricing configuration: contiguous tiers over `[0, ∞)` plus a
/// model-multiplier table.
#[derive(Debug, Clone)]
pub struct PricingTable {
    tiers: Vec<PricingTier>,
    multipliers: HashMap<String, Decimal>,
}

impl PricingTable {
    /// Build a table, enforcing that tiers are contiguous, non-overlapping,
    /// and cover every volume from zero upward.
    pub fn new(
        tiers: Vec<PricingTier>,
        multipliers: Vec<ModelMultiplier>,
    ) -> Result<Self, PricingConfigError> {
        let first = tiers.first().ok_or(PricingConfigError::Empty)?;
        if first.token_range_low != 0 {
            return Err(PricingConfigError::GapAtZero(first.token_range_low));
        }

        let mut expected_low = 0u64;
        for tier in &tiers {
            if tier.token_range_low != expected_low {
                return Err(PricingConfigError::Gap {
                    name: tier.name.clone(),
                    start: tier.token_range_low,
                    expected: expected_low,
                });
            }
            if tier.token_range_high <= tier.token_range_low {
                return Err(PricingConfigError::EmptyRange(tier.name.clone()));
            }
            if tier.volume_discount < Decimal::ZERO || tier.volume_discount >= Decimal::ONE {
                return Err(PricingConfigError::BadDiscount(tier.name.clone()));
            }
            expected_low = tier.token_range_high;
        }

        let last_high = tiers[tiers.len() - 1].token_range_high;
        if last_high != u64::MAX {
            return Err(PricingConfigError::BoundedTop(last_high));
        }

        Ok(Self {
            tiers,
            multipliers: multipliers
                .into_iter()
                .map(|m| (m.model_id, m.multiplier))
                .collect(),
        })
    }

    /// The tier containing `cumulative_tokens`. Total coverage of `[0, ∞)`
    /// is guaranteed by construction, so the lookup always succeeds.
    pub fn tier_for(&self, cumulative_tokens: u64) -> &PricingTier {
        self.tiers
            .iter()
            .find(|t| cumulative_tokens >= t.token_range_low && cumulative_tokens < t.token_range_high)
            .unwrap_or(&self.tiers[self.tiers.len() - 1])
    }

    /// Clamp a caller-supplied markup percentage into `[0, 500]`.
    pub fn clamp_markup(markup_pct: Decimal) -> Decimal {
        if markup_pct < Decimal::ZERO {
            warn!(%markup_pct, "Negative markup clamped to 0");
            Decimal::ZERO
        } else if markup_pct > MAX_MARKUP_PCT {
            warn!(%markup_pct, "Markup above ceiling clamped to 500");
            MAX_MARKUP_PCT
        } else {
            markup_pct
        }
    }

    /// Effective price per 1K tokens for a given cumulative volume, model,
    /// and markup percentage.
    ///
    /// Unknown models price at multiplier 1.0; pricing must never fail on a
    /// model id the table has not seen.
    pub fn unit_price(&self, cumulative_tokens: u64, model_id: &str, markup_pct: Decimal) -> Decimal {
        let tier = self.tier_for(cumulative_tokens);
        let markup = Self::clamp_markup(markup_pct);

        let with_markup =
            tier.base_price_per_1k * (Decimal::ONE + markup / Decimal::ONE_HUNDRED);
        let multiplier = self
            .multipliers
            .get(model_id)
            .copied()
            .unwrap_or(Decimal::ONE);
        let with_model = with_markup * multiplier;
        let discounted = with_model * (Decimal::ONE - tier.volume_discount);

        discounted.round_dp(PRICE_SCALE)
    }

    /// Cost of a raw token count priced at the tier for `cumulative_tokens`.
    pub fn cost_of(
        &self,
        tokens: u64,
        cumulative_tokens: u64,
        model_id: &str,
        markup_pct: Decimal,
    ) -> Decimal {
        let per_1k = self.unit_price(cumulative_tokens, model_id, markup_pct);
        (Decimal::from(tokens) / Decimal::from(1_000u32) * per_1k).round_dp(PRICE_SCALE)
    }
}

impl Default for PricingTable {
    /// The marketplace's standard schedule.
    fn default() -> Self {
        Self::new(default_tiers(), default_multipliers())
            .expect("default pricing schedule is valid")
    }
}

/// Standard tier schedule: Starter / Growth / Scale.
pub fn default_tiers() -> Vec<PricingTier> {
    vec![
        PricingTier {
            name: "Starter".to_string(),
            token_range_low: 0,
            token_range_high: 100_000,
            base_price_per_1k: Decimal::from_parts(2, 0, 0, false, 2), // 0.02
            volume_discount: Decimal::ZERO,
        },
        PricingTier {
            name: "Growth".to_string(),
            token_range_low: 100_000,
            token_range_high: 1_000_000,
            base_price_per_1k: Decimal::from_parts(15, 0, 0, false, 3), // 0.015
            volume_discount: Decimal::from_parts(5, 0, 0, false, 2),    // 5%
        },
        PricingTier {
            name: "Scale".to_string(),
            token_range_low: 1_000_000,
            token_range_high: u64::MAX,
            base_price_per_1k: Decimal::from_parts(11, 0, 0, false, 3), // 0.011
            volume_discount: Decimal::from_parts(12, 0, 0, false, 2),   // 12%
        },
    ]
}

/// Standard model weightings. Models absent from this table price at 1.0.
pub fn default_multipliers() -> Vec<ModelMultiplier> {
    vec![
        ModelMultiplier {
            model_id: "gpt-4o".to_string(),
            multiplier: Decimal::from_parts(25, 0, 0, false, 1), // 2.5
        },
        ModelMultiplier {
            model_id: "gpt-4o-mini".to_string(),
            multiplier: Decimal::from_parts(6, 0, 0, false, 1), // 0.6
        },
        ModelMultiplier {
            model_id: "llama-3-70b".to_string(),
            multiplier: Decimal::from_parts(11, 0, 0, false, 1), // 1.1
        },
        ModelMultiplier {
            model_id: "mistral-large".to_string(),
            multiplier: Decimal::from_parts(14, 0, 0, false, 1), // 1.4
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn pricing_is_deterministic() {
        let table = PricingTable::default();
        let a = table.unit_price(250_000, "gpt-4o", dec("15"));
        let b = table.unit_price(250_000, "gpt-4o", dec("15"));
        assert_eq!(a, b);
    }

    #[test]
    fn boundary_belongs_to_upper_tier() {
        let table = PricingTable::default();

        assert_eq!(table.tier_for(99_999).name, "Starter");
        assert_eq!(table.tier_for(100_000).name, "Growth");

        // Starter: 0.02 flat. Growth: 0.015 with 5% discount.
        assert_eq!(table.unit_price(99_999, "unknown", Decimal::ZERO), dec("0.02"));
        assert_eq!(
            table.unit_price(100_000, "unknown", Decimal::ZERO),
            dec("0.014250")
        );
    }

    #[test]
    fn unknown_model_prices_at_one() {
        let table = PricingTable::default();
        let known_baseline = table.unit_price(0, "no-such-model", Decimal::ZERO);
        assert_eq!(known_baseline, dec("0.02"));
    }

    #[test]
    fn markup_is_non_decreasing() {
        let table = PricingTable::default();
        let base = table.unit_price(0, "gpt-4o", Decimal::ZERO);
        let marked = table.unit_price(0, "gpt-4o", dec("25"));
        assert!(marked > base);
    }

    #[test]
    fn markup_clamps_to_range() {
        let table = PricingTable::default();
        assert_eq!(
            table.unit_price(0, "gpt-4o", dec("600")),
            table.unit_price(0, "gpt-4o", dec("500"))
        );
        assert_eq!(
            table.unit_price(0, "gpt-4o", dec("-10")),
            table.unit_price(0, "gpt-4o", Decimal::ZERO)
        );
    }

    #[test]
    fn discount_is_non_increasing() {
        let tiers = |discount: Decimal| {
            vec![PricingTier {
                name: "Only".to_string(),
                token_range_low: 0,
                token_range_high: u64::MAX,
                base_price_per_1k: dec("0.02"),
                volume_discount: discount,
            }]
        };
        let plain = PricingTable::new(tiers(Decimal::ZERO), vec![]).unwrap();
        let discounted = PricingTable::new(tiers(dec("0.1")), vec![]).unwrap();

        assert!(
            discounted.unit_price(0, "m", Decimal::ZERO) < plain.unit_price(0, "m", Decimal::ZERO)
        );
    }

    #[test]
    fn model_multiplier_applies() {
        let table = PricingTable::default();
        // 0.02 * 2.5 = 0.05 on the Starter tier.
        assert_eq!(table.unit_price(0, "gpt-4o", Decimal::ZERO), dec("0.05"));
    }

    #[test]
    fn cost_of_scales_by_thousand() {
        let table = PricingTable::default();
        // 1500 tokens at 0.02/1K.
        assert_eq!(
            table.cost_of(1_500, 0, "unknown", Decimal::ZERO),
            dec("0.03")
        );
    }

    #[test]
    fn rejects_gapped_tiers() {
        let tiers = vec![
            PricingTier {
                name: "A".to_string(),
                token_range_low: 0,
                token_range_high: 100,
                base_price_per_1k: dec("0.02"),
                volume_discount: Decimal::ZERO,
            },
            PricingTier {
                name: "B".to_string(),
                token_range_low: 200,
                token_range_high: u64::MAX,
                base_price_per_1k: dec("0.01"),
                volume_discount: Decimal::ZERO,
            },
        ];
        assert!(matches!(
            PricingTable::new(tiers, vec![]),
            Err(PricingConfigError::Gap { .. })
        ));
    }

    #[test]
    fn rejects_bounded_top_tier() {
        let tiers = vec![PricingTier {
            name: "A".to_string(),
            token_range_low: 0,
            token_range_high: 100,
            base_price_per_1k: dec("0.02"),
            volume_discount: Decimal::ZERO,
        }];
        assert!(matches!(
            PricingTable::new(tiers, vec![]),
            Err(PricingConfigError::BoundedTop(100))
        ));
    }

    #[test]
    fn rejects_tiers_not_starting_at_zero() {
        let tiers = vec![PricingTier {
            name: "A".to_string(),
            token_range_low: 10,
            token_range_high: u64::MAX,
            base_price_per_1k: dec("0.02"),
            volume_discount: Decimal::ZERO,
        }];
        assert!(matches!(
            PricingTable::new(tiers, vec![]),
            Err(PricingConfigError::GapAtZero(10))
        ));
    }
}
