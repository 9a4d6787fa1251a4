//! Trellis Node - the daemon entry point.
//!
//! Architecture:
//! - Single daemon process with one RocksDB store
//! - One shared `ReferralMatrix` handle over that store
//! - Unix admin socket for local commands (trellis-admin CLI)

use crate::admin_socket::AdminSocket;
use crate::config::NodeConfig;
use crate::error::Result;
use std::sync::Arc;
use trellis_engine::{ReferralMatrix, RocksStore};

/// A Trellis node instance.
pub struct TrellisNode {
    matrix: Arc<ReferralMatrix<RocksStore>>,
    config: NodeConfig,
}

impl TrellisNode {
    /// Open the store and load the tier table.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let tiers = config.load_tiers()?;
        tracing::info!("Loaded {} membership tiers", tiers.tiers().len());

        let store = RocksStore::open(config.data_dir.join("matrix"))?;
        let matrix = ReferralMatrix::new(store, tiers).with_config(config.engine)?;

        Ok(Self {
            matrix: Arc::new(matrix),
            config,
        })
    }

    /// Shared engine handle.
    pub fn matrix(&self) -> Arc<ReferralMatrix<RocksStore>> {
        Arc::clone(&self.matrix)
    }

    /// Serve the admin socket until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Trellis node starting");
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!(
            "  Window: {} levels, {} placement retries",
            self.config.engine.window_depth,
            self.config.engine.placement_retries
        );

        let admin = AdminSocket::new(self.matrix(), &self.config.admin_socket);

        tokio::select! {
            result = admin.run() => result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
            }
        }

        let _ = std::fs::remove_file(&self.config.admin_socket);
        Ok(())
    }
}
