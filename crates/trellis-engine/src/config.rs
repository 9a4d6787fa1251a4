//! Engine tuning knobs.

use crate::error::{Error, Result};
use trellis_matrix::MATRIX_DEPTH;

/// Configuration for placement and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Levels below the sponsor searched for a spillover slot, and the depth
    /// of statistics windows. Within 1..=3.
    pub window_depth: u8,

    /// Extra attempts after a lost slot race before giving up.
    pub placement_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_depth: MATRIX_DEPTH,
            placement_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_depth == 0 || self.window_depth > MATRIX_DEPTH {
            return Err(Error::Config(format!(
                "window depth must be within 1..={}, got {}",
                MATRIX_DEPTH, self.window_depth
            )));
        }
        Ok(())
    }

    /// Total insert attempts for one placement.
    pub fn placement_attempts(&self) -> u32 {
        self.placement_retries.saturating_add(1)
    }
}
