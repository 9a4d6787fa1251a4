//! Trellis Node - Referral Matrix Daemon
//!
//! Hosts one `ReferralMatrix` over a RocksDB store and serves it on a local
//! Unix socket.
//!
//! # Architecture
//!
//! - **Config**: environment variables and an optional JSON tier table
//! - **Node**: opens the store and owns the shared engine handle
//! - **Admin Socket**: newline-delimited JSON commands (trellis-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use trellis_node::{NodeConfig, TrellisNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = TrellisNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod config;
pub mod error;
pub mod node;

pub use admin_socket::{AdminCommand, AdminResponse, AdminSocket};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::TrellisNode;
