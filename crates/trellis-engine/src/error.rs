//! Error types for the matrix engine.

use crate::model::InvestmentStatus;
use thiserror::Error;
use trellis_matrix::{InvestmentId, UserId};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during placement, traversal, or posting.
#[derive(Debug, Error)]
pub enum Error {
    /// The spillover search found no free slot within the bounded window.
    #[error("no free slot within {depth} levels of sponsor {sponsor}")]
    NoCapacityWithinWindow { sponsor: UserId, depth: u8 },

    /// The sponsor does not exist or would create a cycle.
    #[error("invalid sponsor {sponsor}: {reason}")]
    InvalidSponsor { sponsor: UserId, reason: &'static str },

    /// The sponsor's own position has been deactivated.
    #[error("sponsor {0} is inactive")]
    SponsorInactive(UserId),

    /// The participant was deactivated and cannot be placed again.
    #[error("participant {0} is inactive")]
    ParticipantInactive(UserId),

    /// The participant is not known to the directory.
    #[error("unknown participant {0}")]
    UnknownParticipant(UserId),

    /// The investment is not known to the directory.
    #[error("unknown investment {0}")]
    UnknownInvestment(InvestmentId),

    /// The investment has not reached a commission-eligible status.
    #[error("investment {investment} is {status:?}, not eligible for commissions")]
    InvestmentNotEligible {
        investment: InvestmentId,
        status: InvestmentStatus,
    },

    /// Placement kept losing slot races.
    #[error("placement lost {attempts} consecutive slot races")]
    TransactionConflict { attempts: u32 },

    /// An ancestor walk visited the same participant twice.
    #[error("sponsor chain cycles through {0}")]
    CycleDetected(UserId),

    /// Engine configuration out of range
    #[error("Invalid config: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tier table or amount error
    #[error(transparent)]
    Matrix(#[from] trellis_matrix::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl Error {
    /// True for failures the caller may resolve by retrying the whole event.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransactionConflict { .. } | Error::Storage(_))
    }
}
