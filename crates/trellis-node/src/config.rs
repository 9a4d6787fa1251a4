//! Daemon configuration from environment variables.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use trellis_engine::EngineConfig;
use trellis_matrix::{MembershipTier, TierRateTable};

/// Configuration for a Trellis node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Data directory for the RocksDB store
    pub data_dir: PathBuf,

    /// Admin socket path (for the trellis-admin CLI)
    pub admin_socket: PathBuf,

    /// JSON tier table; the standard table when unset
    pub tiers_file: Option<PathBuf>,

    /// Placement and reporting knobs
    pub engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./trellis-data");
        Self {
            admin_socket: data_dir.join("admin.sock"),
            data_dir,
            tiers_file: None,
            engine: EngineConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let data_dir = lookup("TRELLIS_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let admin_socket = lookup("TRELLIS_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));
        let tiers_file = lookup("TRELLIS_TIERS_FILE").map(PathBuf::from);

        let mut engine = defaults.engine;
        if let Some(depth) = lookup("TRELLIS_MATRIX_DEPTH") {
            engine.window_depth = parse_var("TRELLIS_MATRIX_DEPTH", &depth)?;
        }
        if let Some(retries) = lookup("TRELLIS_PLACEMENT_RETRIES") {
            engine.placement_retries = parse_var("TRELLIS_PLACEMENT_RETRIES", &retries)?;
        }
        engine.validate().map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            data_dir,
            admin_socket,
            tiers_file,
            engine,
        })
    }

    /// Load the configured tier table.
    pub fn load_tiers(&self) -> Result<TierRateTable> {
        match &self.tiers_file {
            Some(path) => load_tier_file(path),
            None => Ok(TierRateTable::standard()),
        }
    }
}

/// Read a JSON array of tiers and validate it into a table.
pub fn load_tier_file(path: &Path) -> Result<TierRateTable> {
    let raw = std::fs::read_to_string(path)?;
    let tiers: Vec<MembershipTier> = serde_json::from_str(&raw)?;
    Ok(TierRateTable::new(tiers)?)
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.admin_socket, PathBuf::from("./trellis-data/admin.sock"));
        assert_eq!(config.engine.window_depth, 3);
    }

    #[test]
    fn socket_follows_data_dir() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("TRELLIS_DATA_DIR", "/var/lib/trellis"),
            ("TRELLIS_PLACEMENT_RETRIES", "9"),
        ]))
        .unwrap();
        assert_eq!(config.admin_socket, PathBuf::from("/var/lib/trellis/admin.sock"));
        assert_eq!(config.engine.placement_retries, 9);
    }

    #[test]
    fn explicit_socket_overrides_data_dir() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("TRELLIS_DATA_DIR", "/var/lib/trellis"),
            ("TRELLIS_SOCKET", "/run/trellis.sock"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/trellis"));
        assert_eq!(config.admin_socket, PathBuf::from("/run/trellis.sock"));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("TRELLIS_MATRIX_DEPTH", "deep")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("TRELLIS_MATRIX_DEPTH", "7")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn loads_tier_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Bronze", "rank": 1, "direct_referral_rate": 4.0, "level2_rate": 0.0,
                 "level3_rate": 0.0, "paid_levels": 1, "min_investment": 10000},
                {"name": "Diamond", "rank": 2, "direct_referral_rate": 20.0, "level2_rate": 10.0,
                 "level3_rate": 5.0, "paid_levels": 3, "min_investment": 5000000}
            ]"#,
        )
        .unwrap();

        let config = NodeConfig {
            tiers_file: Some(path),
            ..NodeConfig::default()
        };
        let tiers = config.load_tiers().unwrap();
        assert_eq!(tiers.tiers().len(), 2);
        assert!(tiers.is_eligible("Diamond", 3));
        assert!(!tiers.is_eligible("Bronze", 2));
    }

    #[test]
    fn rejects_invalid_tier_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(load_tier_file(&path), Err(Error::Tiers(_))));
    }
}
