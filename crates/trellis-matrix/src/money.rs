//! Money in minor units and percentage rates.
//!
//! Amounts are tracked as whole ngwee (1 Kwacha = 100 ngwee) so commission
//! arithmetic never touches floating point. Rates are stored as percentages
//! in 0-100 and quantised to basis points once, at the point of use.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Minor units per major currency unit.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// A monetary amount in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Money(pub i64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create from minor units.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Create from whole major units.
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Self(major * MINOR_UNITS_PER_MAJOR)
    }

    /// Raw minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// True if strictly positive.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Saturating addition, used for running totals.
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_UNITS_PER_MAJOR as u64;
        write!(f, "{}{}.{:02}", sign, abs / unit, abs % unit)
    }
}

impl FromStr for Money {
    type Err = Error;

    /// Parse a major-unit decimal string such as `"1500"` or `"10000.50"`.
    ///
    /// At most two fractional digits are accepted.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAmount(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let major: i64 = whole.parse().map_err(|_| invalid())?;
        let minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let total = major
            .checked_mul(MINOR_UNITS_PER_MAJOR)
            .and_then(|m| m.checked_add(minor))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -total } else { total }))
    }
}

/// A percentage rate in 0-100.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Rate(pub f64);

impl Rate {
    /// Zero percent.
    pub const ZERO: Self = Self(0.0);

    /// Create from a percentage (15.0 means 15%).
    #[inline]
    pub const fn percent(value: f64) -> Self {
        Self(value)
    }

    /// The percentage value.
    #[inline]
    pub const fn as_percent(&self) -> f64 {
        self.0
    }

    /// Hundredths of a percent, rounded to nearest.
    ///
    /// 15.0% → 1500, 2.5% → 250. Negative or non-finite rates map to 0.
    pub fn basis_points(&self) -> u32 {
        if !self.0.is_finite() || self.0 <= 0.0 {
            return 0;
        }
        (self.0 * 100.0).round() as u32
    }

    /// Finite and within 0-100.
    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && (0.0..=100.0).contains(&self.0)
    }

    /// True if this rate pays nothing.
    pub fn is_zero(&self) -> bool {
        self.basis_points() == 0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
