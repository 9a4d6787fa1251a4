//! Error types for the Trellis daemon.

use thiserror::Error;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting or serving the daemon.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine error
    #[error(transparent)]
    Engine(#[from] trellis_engine::Error),

    /// Tier table error
    #[error("Tier table error: {0}")]
    Tiers(#[from] trellis_matrix::Error),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking engine task panicked or was cancelled
    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
