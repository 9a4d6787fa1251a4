//! Error types for matrix math and tier tables.

use thiserror::Error;

/// Result type for trellis-matrix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building tiers or parsing amounts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A monetary amount could not be parsed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A percentage outside 0-100 or not finite.
    #[error("invalid rate {rate} for tier {tier}")]
    InvalidRate { tier: String, rate: f64 },

    /// Paid levels must be within 1..=3.
    #[error("tier {tier} pays {paid_levels} levels, expected 1..=3")]
    InvalidPaidLevels { tier: String, paid_levels: u8 },

    /// Two tiers share a name.
    #[error("duplicate tier: {0}")]
    DuplicateTier(String),

    /// A table with no tiers.
    #[error("tier table is empty")]
    EmptyTable,
}
