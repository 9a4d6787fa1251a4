//! Trellis Engine - Matrix Placement and Commissions
//!
//! Places participants into a 3-wide referral matrix and pays multi-level
//! commissions on their investments.
//!
//! # Architecture
//!
//! - **Placement**: direct slots first, then breadth-first spillover within
//!   a bounded window below the sponsor
//! - **Traversal**: depth-limited views, per-level counts, downline volume
//! - **Commissions**: tier rates × position multipliers, posted exactly once
//!   per `(investment, referrer, level)`
//! - **Store**: in-memory and RocksDB backends behind the same traits
//!
//! # Example
//!
//! ```no_run
//! use trellis_engine::{MemoryStore, Participant, ReferralMatrix};
//! use trellis_matrix::{TierRateTable, UserId};
//!
//! let matrix = ReferralMatrix::new(MemoryStore::new(), TierRateTable::standard());
//! matrix.register_participant(&Participant::new(UserId(1)).with_tier("Gold"))?;
//! matrix.register_participant(&Participant::new(UserId(2)).with_referrer(UserId(1)))?;
//! let placement = matrix.find_or_create_position(UserId(1), UserId(2))?;
//! assert_eq!(placement.position().level, 1);
//! # Ok::<(), trellis_engine::Error>(())
//! ```

pub mod clock;
pub mod commission;
pub mod config;
pub mod error;
pub mod matrix;
pub mod model;
pub mod placement;
pub mod store;
pub mod traversal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commission::CommissionCalculator;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use matrix::{InvestmentOutcome, ReferralMatrix};
pub use model::{
    CommissionKey, CommissionLineItem, CommissionRecord, CommissionStatus, CommissionType, Investment,
    InvestmentStatus, MatrixPosition, NewPosition, Participant, PlacementType, ReferrerBalance,
};
pub use placement::{MatrixPlacementEngine, Placement};
pub use store::{
    CommissionStore, InsertOutcome, MemoryStore, ParticipantDirectory, PositionStore, PostingOutcome, RecordOutcome,
    RocksStore, Store,
};
pub use traversal::{LevelFill, MatrixNode, MatrixStatistics, MatrixTree, NetworkTraversal};
