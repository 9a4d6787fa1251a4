//! Trellis Referral Matrix
//!
//! Pure domain math for a bounded-width referral tree ("3×3 matrix").
//!
//! # Matrix Shape
//!
//! Every participant sponsors at most 3 direct children. Commissions and
//! reporting views look at a sliding window of 3 levels below a reference
//! node, so a full window holds 3 + 9 + 27 = 39 positions.
//!
//! # Commission Formula
//!
//! ```text
//! amount = investment × tier_rate(level) × position_multiplier(level) / 100
//! ```
//!
//! Rates come from the referrer's membership tier. Position multipliers are
//! fixed: 1.0, 0.8, 0.6 for levels 1, 2, 3. All arithmetic is integer, in
//! minor currency units, rounding half up.
//!
//! Nothing in this crate performs I/O. Storage, placement and posting live
//! in `trellis-engine`.

mod error;
mod ids;
mod money;
mod tier;

pub use error::{Error, Result};
pub use ids::{InvestmentId, PositionId, UserId};
pub use money::{Money, Rate, MINOR_UNITS_PER_MAJOR};
pub use tier::{commission_amount, position_multiplier, MembershipTier, TierRateTable};

/// Maximum number of direct children under any sponsor.
pub const MATRIX_WIDTH: u8 = 3;

/// Depth of the commission and reporting window.
pub const MATRIX_DEPTH: u8 = 3;

/// Total slots in a window `max_level` levels deep.
///
/// Formula: Σ 3^i for i in 1..=n = (3^(n+1) - 3) / 2. Saturates at
/// `u64::MAX`.
///
/// ```
/// use trellis_matrix::matrix_capacity;
///
/// assert_eq!(matrix_capacity(1), 3);
/// assert_eq!(matrix_capacity(3), 39);
/// ```
pub const fn matrix_capacity(max_level: u8) -> u64 {
    let mut total: u64 = 0;
    let mut level: u16 = 1;
    while level <= max_level as u16 {
        total = total.saturating_add(slots_at_level(level as u8));
        level += 1;
    }
    total
}

/// Number of slots at exactly `level` below a node. Saturates at `u64::MAX`.
pub const fn slots_at_level(level: u8) -> u64 {
    match (MATRIX_WIDTH as u64).checked_pow(level as u32) {
        Some(slots) => slots,
        None => u64::MAX,
    }
}
