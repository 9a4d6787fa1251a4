//! Membership tiers and the commission rate lookup.
//!
//! A tier fixes the base referral rate for each of the three matrix levels
//! and how many of those levels it pays at all. Position multipliers are
//! independent of tier and model the decaying value of indirect recruitment.

use crate::error::{Error, Result};
use crate::money::{Money, Rate};
use crate::MATRIX_DEPTH;
use std::collections::HashSet;

/// Position multipliers in tenths for levels 1, 2, 3 (1.0, 0.8, 0.6).
const POSITION_MULTIPLIER_TENTHS: [u32; MATRIX_DEPTH as usize] = [10, 8, 6];

/// Denominator for `minor × bp × tenths`: percent (100) × bp (100) × tenths (10).
const COMMISSION_DENOMINATOR: u128 = 100 * 100 * 10;

/// Position multiplier for a level (1-based), `None` outside the window.
///
/// ```
/// use trellis_matrix::position_multiplier;
///
/// assert_eq!(position_multiplier(1), Some(1.0));
/// assert_eq!(position_multiplier(3), Some(0.6));
/// assert_eq!(position_multiplier(4), None);
/// ```
pub fn position_multiplier(level: u8) -> Option<f64> {
    multiplier_tenths(level).map(|t| f64::from(t) / 10.0)
}

fn multiplier_tenths(level: u8) -> Option<u32> {
    if level == 0 {
        return None;
    }
    POSITION_MULTIPLIER_TENTHS.get(level as usize - 1).copied()
}

/// Commission for one level: `amount × rate × multiplier(level) / 100`.
///
/// Computed in minor units with round-half-up. Non-positive amounts and
/// levels outside 1..=3 yield zero.
pub fn commission_amount(amount: Money, rate: Rate, level: u8) -> Money {
    let Some(tenths) = multiplier_tenths(level) else {
        return Money::ZERO;
    };
    if !amount.is_positive() {
        return Money::ZERO;
    }

    let numerator = amount.minor() as u128 * u128::from(rate.basis_points()) * u128::from(tenths);
    let rounded = (numerator + COMMISSION_DENOMINATOR / 2) / COMMISSION_DENOMINATOR;
    Money::from_minor(i64::try_from(rounded).unwrap_or(i64::MAX))
}

/// A membership rank with its referral rates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MembershipTier {
    /// Unique tier name, referenced by participants
    pub name: String,
    /// Ordering among tiers (higher is better)
    pub rank: u8,
    /// Level 1 rate
    pub direct_referral_rate: Rate,
    /// Level 2 rate
    pub level2_rate: Rate,
    /// Level 3 rate
    pub level3_rate: Rate,
    /// How many levels this tier pays (1..=3)
    pub paid_levels: u8,
    /// Minimum investment to qualify for this tier
    pub min_investment: Money,
}

impl MembershipTier {
    /// Create a tier. `paid_levels` is not validated until the tier joins a table.
    pub fn new(
        name: impl Into<String>,
        rank: u8,
        rates: [f64; 3],
        paid_levels: u8,
        min_investment: Money,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            direct_referral_rate: Rate::percent(rates[0]),
            level2_rate: Rate::percent(rates[1]),
            level3_rate: Rate::percent(rates[2]),
            paid_levels,
            min_investment,
        }
    }

    /// Base rate for a level, ignoring eligibility.
    pub fn base_rate(&self, level: u8) -> Option<Rate> {
        match level {
            1 => Some(self.direct_referral_rate),
            2 => Some(self.level2_rate),
            3 => Some(self.level3_rate),
            _ => None,
        }
    }

    /// The rate this tier pays at `level`, if it pays that level at all.
    pub fn rate(&self, level: u8) -> Option<Rate> {
        if level == 0 || level > self.paid_levels {
            return None;
        }
        self.base_rate(level).filter(|r| !r.is_zero())
    }

    /// Whether this tier earns at `level`.
    pub fn is_eligible(&self, level: u8) -> bool {
        self.rate(level).is_some()
    }

    fn validate(&self) -> Result<()> {
        if self.paid_levels == 0 || self.paid_levels > MATRIX_DEPTH {
            return Err(Error::InvalidPaidLevels {
                tier: self.name.clone(),
                paid_levels: self.paid_levels,
            });
        }
        for rate in [self.direct_referral_rate, self.level2_rate, self.level3_rate] {
            if !rate.is_valid() {
                return Err(Error::InvalidRate {
                    tier: self.name.clone(),
                    rate: rate.as_percent(),
                });
            }
        }
        Ok(())
    }
}

/// Validated set of tiers, ordered by rank.
#[derive(Debug, Clone, PartialEq)]
pub struct TierRateTable {
    tiers: Vec<MembershipTier>,
}

impl TierRateTable {
    /// Build a table, validating every tier.
    pub fn new(mut tiers: Vec<MembershipTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::EmptyTable);
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            tier.validate()?;
            if !seen.insert(tier.name.as_str()) {
                return Err(Error::DuplicateTier(tier.name.clone()));
            }
        }

        tiers.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.min_investment.cmp(&b.min_investment)));
        Ok(Self { tiers })
    }

    /// The platform's standard five tiers.
    ///
    /// | Tier    | L1  | L2  | L3 | Paid levels | Minimum |
    /// |---------|-----|-----|----|-------------|---------|
    /// | Basic   | 5%  | -   | -  | 1           | 500     |
    /// | Starter | 7%  | -   | -  | 1           | 1,000   |
    /// | Silver  | 10% | 5%  | -  | 2           | 2,500   |
    /// | Gold    | 12% | 7%  | 3% | 3           | 5,000   |
    /// | Elite   | 15% | 10% | 5% | 3           | 10,000  |
    pub fn standard() -> Self {
        Self {
            tiers: vec![
                MembershipTier::new("Basic", 1, [5.0, 0.0, 0.0], 1, Money::from_major(500)),
                MembershipTier::new("Starter", 2, [7.0, 0.0, 0.0], 1, Money::from_major(1_000)),
                MembershipTier::new("Silver", 3, [10.0, 5.0, 0.0], 2, Money::from_major(2_500)),
                MembershipTier::new("Gold", 4, [12.0, 7.0, 3.0], 3, Money::from_major(5_000)),
                MembershipTier::new("Elite", 5, [15.0, 10.0, 5.0], 3, Money::from_major(10_000)),
            ],
        }
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&MembershipTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Rate paid by tier `name` at `level`.
    pub fn rate(&self, name: &str, level: u8) -> Option<Rate> {
        self.get(name).and_then(|t| t.rate(level))
    }

    /// Whether tier `name` earns at `level`. Unknown tiers earn nothing.
    pub fn is_eligible(&self, name: &str, level: u8) -> bool {
        self.rate(name, level).is_some()
    }

    /// Highest-ranked tier whose minimum is met by `amount`.
    pub fn tier_for_investment(&self, amount: Money) -> Option<&MembershipTier> {
        self.tiers
            .iter()
            .filter(|t| t.min_investment <= amount)
            .max_by_key(|t| t.rank)
    }

    /// All tiers, lowest rank first.
    pub fn tiers(&self) -> &[MembershipTier] {
        &self.tiers
    }
}

impl Default for TierRateTable {
    fn default() -> Self {
        Self::standard()
    }
}
