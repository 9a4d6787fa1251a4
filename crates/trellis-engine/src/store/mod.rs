//! Storage abstraction for placements, commissions, and read models.
//!
//! RULE: only store implementations touch durable state. Invariants that must
//! survive concurrent writers (one slot per `(sponsor, level, position)`, one
//! active position per user, one posting per investment, one commission per
//! `(investment, referrer, level)`) are enforced here, inside each store's critical section, never by
//! check-then-write in engine code.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::error::Result;
use crate::model::{
    CommissionRecord, Investment, MatrixPosition, NewPosition, Participant, ReferrerBalance,
};
use trellis_matrix::{InvestmentId, PositionId, UserId};

/// Result of an atomic slot claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The slot was free and is now held by the returned position.
    Inserted(MatrixPosition),
    /// Another active position already holds `(sponsor, level, position)`.
    SlotTaken,
    /// The user already has an active position (returned).
    UserAlreadyPlaced(MatrixPosition),
}

/// Result of recording one commission within a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Newly written; the referrer's balance was credited.
    Inserted(CommissionRecord),
    /// A record with the same key already existed (returned unchanged).
    Duplicate(CommissionRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &CommissionRecord {
        match self {
            RecordOutcome::Inserted(r) | RecordOutcome::Duplicate(r) => r,
        }
    }

    pub fn into_record(self) -> CommissionRecord {
        match self {
            RecordOutcome::Inserted(r) | RecordOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate(_))
    }
}

/// Result of posting the commission set of one investment.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingOutcome {
    /// First posting; per-record outcomes in input order.
    Posted(Vec<RecordOutcome>),
    /// The investment was posted before. Nothing was written.
    AlreadyPosted,
}

/// Placement records.
pub trait PositionStore: Send + Sync {
    /// The user's active position, if any.
    fn position_of(&self, user: UserId) -> Result<Option<MatrixPosition>>;

    /// The most recent position of a user regardless of active flag.
    fn latest_position_of(&self, user: UserId) -> Result<Option<MatrixPosition>>;

    /// Fetch a position by id.
    fn position(&self, id: PositionId) -> Result<Option<MatrixPosition>>;

    /// Active positions whose `sponsor_id` is `sponsor`, ordered by slot.
    fn active_children(&self, sponsor: UserId) -> Result<Vec<MatrixPosition>>;

    /// Atomically claim a slot.
    fn insert_position(&self, new: NewPosition) -> Result<InsertOutcome>;

    /// Soft-disable the user's active position, freeing its slot.
    fn deactivate_position(&self, user: UserId) -> Result<Option<MatrixPosition>>;
}

/// Commission ledger: append-only records plus referrer balances.
pub trait CommissionStore: Send + Sync {
    /// Record the full commission set of `investment` atomically, together
    /// with its posted marker. Once the marker exists every later call
    /// returns [`PostingOutcome::AlreadyPosted`], including after an empty
    /// set. Records whose key already exists are skipped and returned as
    /// duplicates; only inserted records credit balances.
    fn record_commissions(&self, investment: InvestmentId, records: Vec<CommissionRecord>)
        -> Result<PostingOutcome>;

    /// True once [`CommissionStore::record_commissions`] ran for the investment.
    fn is_posted(&self, investment: InvestmentId) -> Result<bool>;

    /// All records posted for an investment, ordered by level.
    fn commissions_for_investment(&self, investment: InvestmentId) -> Result<Vec<CommissionRecord>>;

    /// All records earned by a referrer.
    fn commissions_for_referrer(&self, referrer: UserId) -> Result<Vec<CommissionRecord>>;

    /// Current balance of a referrer (zero if never credited).
    fn balance(&self, user: UserId) -> Result<ReferrerBalance>;
}

/// Read models owned by the surrounding platform.
pub trait ParticipantDirectory: Send + Sync {
    fn participant(&self, id: UserId) -> Result<Option<Participant>>;

    fn put_participant(&self, participant: &Participant) -> Result<()>;

    fn investment(&self, id: InvestmentId) -> Result<Option<Investment>>;

    /// All investments made by a user.
    fn investments_of(&self, user: UserId) -> Result<Vec<Investment>>;

    fn put_investment(&self, investment: &Investment) -> Result<()>;
}

/// Everything the engine needs from persistence.
pub trait Store: PositionStore + CommissionStore + ParticipantDirectory {}

impl<T: PositionStore + CommissionStore + ParticipantDirectory> Store for T {}
