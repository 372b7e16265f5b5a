//! Storage-node configuration.
//!
//! Loaded from a JSON file or assembled by the binary from environment
//! variables. Example:
//!
//! ```json
//! {
//!   "controllers": ["10.0.0.1:2048"],
//!   "ip": "10.0.0.7",
//!   "port": 11811,
//!   "volume": { "id": 1, "dir": "/var/lib/eventflow", "capacity": 536870912000 },
//!   "heartbeat_interval_ms": 3000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use eventflow_core::Id;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Controller endpoints to report heartbeats to.
    pub controllers: Vec<String>,

    #[serde(default = "default_ip")]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub volume: VolumeInfo,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: Id,

    /// Directory holding this volume's block files.
    pub dir: PathBuf,

    #[serde(default = "default_volume_capacity")]
    pub capacity: u64,
}

impl StoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("invalid store config: {e}")))
    }

    /// The address this volume advertises to the controller.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11811
}

fn default_heartbeat_interval_ms() -> u64 {
    3000
}

fn default_volume_capacity() -> u64 {
    500 * 1024 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let config: StoreConfig = serde_json::from_str(
            r#"{
                "controllers": ["127.0.0.1:2048"],
                "volume": { "id": 5, "dir": "/tmp/vol" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.ip, "127.0.0.1");
        assert_eq!(config.port, 11811);
        assert_eq!(config.volume.id, Id(5));
        assert_eq!(config.volume.capacity, 500 * 1024 * 1024 * 1024);
        assert_eq!(config.heartbeat_interval_ms, 3000);
        assert_eq!(config.address(), "127.0.0.1:11811");
    }

    #[test]
    fn test_explicit_values_win() {
        let config: StoreConfig = serde_json::from_str(
            r#"{
                "controllers": [],
                "ip": "10.1.2.3",
                "port": 4000,
                "volume": { "id": 1, "dir": "/data", "capacity": 1024 },
                "heartbeat_interval_ms": 500
            }"#,
        )
        .unwrap();
        assert_eq!(config.address(), "10.1.2.3:4000");
        assert_eq!(config.volume.capacity, 1024);
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(StoreConfig::load(&path).is_err());
    }
}
