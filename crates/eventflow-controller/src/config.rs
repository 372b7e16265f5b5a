//! Controller configuration.
//!
//! Defaults mirror production: three replicas per segment, two
//! appendable segments kept per eventlog, second-granularity scale and
//! GC loops, minute-granularity expiration sweeps, 72-hour retention.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Endpoints of the metadata KV store.
    #[serde(default)]
    pub kv_endpoints: Vec<String>,

    /// Replicas per segment.
    #[serde(default = "default_replica_count")]
    pub replica_count: usize,

    /// Capacity of newly allocated blocks, bytes.
    #[serde(default = "default_block_size")]
    pub default_block_size: u64,

    /// Appendable segments each eventlog keeps ahead of the cursor.
    #[serde(default = "default_appendable_segments")]
    pub default_appendable_segments: usize,

    #[serde(default = "default_scale_interval_ms")]
    pub scale_interval_ms: u64,

    #[serde(default = "default_clean_interval_ms")]
    pub clean_interval_ms: u64,

    #[serde(default = "default_check_expired_interval_ms")]
    pub check_expired_interval_ms: u64,

    /// Retention: a frozen segment older than this is retired.
    #[serde(default = "default_segment_expired_time_ms")]
    pub segment_expired_time_ms: i64,

    /// A volume whose last heartbeat is older than this is dead.
    #[serde(default = "default_volume_liveness_timeout_ms")]
    pub volume_liveness_timeout_ms: u64,

    /// When a frozen head has no recorded last event time, stamp it
    /// `now + ttl` (deferring expiry by a full extra window, matching
    /// the historical behavior) instead of `now`.
    #[serde(default = "default_true")]
    pub defer_expiry_on_missing_time: bool,

    /// TTL of the name service's lookup cache.
    #[serde(default = "default_name_cache_ttl_ms")]
    pub name_cache_ttl_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kv_endpoints: Vec::new(),
            replica_count: default_replica_count(),
            default_block_size: default_block_size(),
            default_appendable_segments: default_appendable_segments(),
            scale_interval_ms: default_scale_interval_ms(),
            clean_interval_ms: default_clean_interval_ms(),
            check_expired_interval_ms: default_check_expired_interval_ms(),
            segment_expired_time_ms: default_segment_expired_time_ms(),
            volume_liveness_timeout_ms: default_volume_liveness_timeout_ms(),
            defer_expiry_on_missing_time: default_true(),
            name_cache_ttl_ms: default_name_cache_ttl_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Internal(format!("cannot read controller config: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("invalid controller config: {e}")))
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.clean_interval_ms)
    }

    pub fn check_expired_interval(&self) -> Duration {
        Duration::from_millis(self.check_expired_interval_ms)
    }

    pub fn volume_liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.volume_liveness_timeout_ms)
    }

    pub fn name_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.name_cache_ttl_ms)
    }
}

fn default_replica_count() -> usize {
    3
}

fn default_block_size() -> u64 {
    64 * 1024 * 1024
}

fn default_appendable_segments() -> usize {
    2
}

fn default_scale_interval_ms() -> u64 {
    1000
}

fn default_clean_interval_ms() -> u64 {
    1000
}

fn default_check_expired_interval_ms() -> u64 {
    60_000
}

fn default_segment_expired_time_ms() -> i64 {
    72 * 60 * 60 * 1000
}

fn default_volume_liveness_timeout_ms() -> u64 {
    10_000
}

fn default_name_cache_ttl_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.replica_count, 3);
        assert_eq!(config.default_appendable_segments, 2);
        assert_eq!(config.default_block_size, 64 * 1024 * 1024);
        assert_eq!(config.scale_interval(), Duration::from_secs(1));
        assert_eq!(config.clean_interval(), Duration::from_secs(1));
        assert_eq!(config.check_expired_interval(), Duration::from_secs(60));
        assert_eq!(config.segment_expired_time_ms, 72 * 60 * 60 * 1000);
        assert!(config.defer_expiry_on_missing_time);
    }

    #[test]
    fn test_partial_file_overrides() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{ "replica_count": 1, "segment_expired_time_ms": 100, "defer_expiry_on_missing_time": false }"#,
        )
        .unwrap();
        assert_eq!(config.replica_count, 1);
        assert_eq!(config.segment_expired_time_ms, 100);
        assert!(!config.defer_expiry_on_missing_time);
        assert_eq!(config.default_appendable_segments, 2);
    }
}
