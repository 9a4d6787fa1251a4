//! Records the engine reads and writes.
//!
//! Positions and commission records are owned by the engine. Participants
//! and investments are read models supplied by the surrounding platform.

use serde::{Deserialize, Serialize};
use trellis_matrix::{InvestmentId, Money, PositionId, Rate, UserId};

/// How a position was allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementType {
    /// Directly under the requested sponsor
    Direct,
    /// Under a descendant because the sponsor's slots were full
    Spillover,
}

/// A participant's place in the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixPosition {
    /// Store-assigned identifier
    pub id: PositionId,
    /// The placed participant
    pub user_id: UserId,
    /// Matrix parent (after spillover this is the receiving descendant)
    pub sponsor_id: UserId,
    /// Absolute depth; children of an unplaced root sit at level 1
    pub level: u32,
    /// Slot under the parent, 1..=3
    pub position: u8,
    /// Soft-delete flag
    pub is_active: bool,
    pub placement_type: PlacementType,
    /// The sponsor originally requested when the placement spilled over
    pub spillover_from_id: Option<UserId>,
    /// Placement time in milliseconds since epoch
    pub placed_at: u64,
}

/// A slot claim handed to the store. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosition {
    pub user_id: UserId,
    pub sponsor_id: UserId,
    pub level: u32,
    pub position: u8,
    pub placement_type: PlacementType,
    pub spillover_from_id: Option<UserId>,
    pub placed_at: u64,
}

impl NewPosition {
    /// Materialise with a store-assigned id.
    pub fn into_position(self, id: PositionId) -> MatrixPosition {
        MatrixPosition {
            id,
            user_id: self.user_id,
            sponsor_id: self.sponsor_id,
            level: self.level,
            position: self.position,
            is_active: true,
            placement_type: self.placement_type,
            spillover_from_id: self.spillover_from_id,
            placed_at: self.placed_at,
        }
    }
}

/// A network member as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    /// Who referred this participant; used as the placement sponsor
    pub referrer_id: Option<UserId>,
    /// Membership tier name, resolved against the tier table
    pub tier: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Cached count of active positions in the 3-level window
    #[serde(default)]
    pub downline_count: u64,
    /// Cached eligible investment volume in the 3-level window
    #[serde(default)]
    pub downline_volume: Money,
}

fn default_active() -> bool {
    true
}

impl Participant {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            referrer_id: None,
            tier: None,
            is_active: true,
            downline_count: 0,
            downline_volume: Money::ZERO,
        }
    }

    pub fn with_referrer(mut self, referrer: UserId) -> Self {
        self.referrer_id = Some(referrer);
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Investment lifecycle as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    Active,
    Paid,
    Rejected,
    Withdrawn,
}

impl InvestmentStatus {
    /// Statuses that trigger commissions.
    pub fn is_eligible(&self) -> bool {
        matches!(self, InvestmentStatus::Active | InvestmentStatus::Paid)
    }
}

/// A qualifying financial event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub amount: Money,
    pub status: InvestmentStatus,
}

impl Investment {
    pub fn new(id: InvestmentId, user_id: UserId, amount: Money, status: InvestmentStatus) -> Self {
        Self {
            id,
            user_id,
            amount,
            status,
        }
    }
}

/// Payout state of a commission record. Transitions happen outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    Matrix,
}

/// Natural idempotency key of a commission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommissionKey {
    pub investment_id: InvestmentId,
    pub referrer_id: UserId,
    pub level: u8,
}

impl CommissionKey {
    /// Deterministic record id: hex Blake3 of the key.
    pub fn record_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"commission");
        hasher.update(&self.investment_id.value().to_le_bytes());
        hasher.update(&self.referrer_id.value().to_le_bytes());
        hasher.update(&[self.level]);
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// One computed commission, before it is posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionLineItem {
    pub referrer_id: UserId,
    pub referee_id: UserId,
    pub investment_id: InvestmentId,
    /// Hops from the investor, 1..=3
    pub level: u8,
    pub amount: Money,
    /// Tier rate before the position multiplier
    pub percentage_applied: Rate,
    /// The investor's position the commission flowed from
    pub matrix_position: PositionId,
}

impl CommissionLineItem {
    pub fn key(&self) -> CommissionKey {
        CommissionKey {
            investment_id: self.investment_id,
            referrer_id: self.referrer_id,
            level: self.level,
        }
    }
}

/// A posted commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: String,
    pub referrer_id: UserId,
    pub referee_id: UserId,
    pub investment_id: InvestmentId,
    pub level: u8,
    pub amount: Money,
    pub percentage_applied: Rate,
    pub matrix_position: PositionId,
    pub status: CommissionStatus,
    pub commission_type: CommissionType,
    pub created_at: u64,
}

impl CommissionRecord {
    /// A pending record for a computed line item.
    pub fn pending(item: CommissionLineItem, created_at: u64) -> Self {
        Self {
            id: item.key().record_id(),
            referrer_id: item.referrer_id,
            referee_id: item.referee_id,
            investment_id: item.investment_id,
            level: item.level,
            amount: item.amount,
            percentage_applied: item.percentage_applied,
            matrix_position: item.matrix_position,
            status: CommissionStatus::Pending,
            commission_type: CommissionType::Matrix,
            created_at,
        }
    }

    pub fn key(&self) -> CommissionKey {
        CommissionKey {
            investment_id: self.investment_id,
            referrer_id: self.referrer_id,
            level: self.level,
        }
    }
}

/// Running commission totals for a referrer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferrerBalance {
    pub user_id: UserId,
    /// Posted but not yet paid out
    pub pending: Money,
    /// Everything ever credited
    pub total_earned: Money,
}

impl ReferrerBalance {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            pending: Money::ZERO,
            total_earned: Money::ZERO,
        }
    }

    pub fn credit(&mut self, amount: Money) {
        self.pending = self.pending.saturating_add(amount);
        self.total_earned = self.total_earned.saturating_add(amount);
    }
}
