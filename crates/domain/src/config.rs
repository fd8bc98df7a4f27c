//! Broker configuration.
//!
//! Loaded from `lattice.toml` by the `latticed` binary. Every field has a
//! default so a missing file or a partial file both work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for broker state. Per-entry upstream files live
    /// under `<root>/upstream/`.
    #[serde(default = "d_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: d_storage_root(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Delay before the first ping on a fresh upstream connection.
    #[serde(default = "d_1000")]
    pub ping_initial_ms: u64,
    /// Interval between pings after the first.
    #[serde(default = "d_10000")]
    pub ping_interval_ms: u64,
    /// Initial reconnect delay after a dropped upstream connection.
    #[serde(default = "d_1000")]
    pub reconnect_initial_ms: u64,
    /// Cap on the reconnect delay.
    #[serde(default = "d_60000")]
    pub reconnect_max_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ping_initial_ms: 1_000,
            ping_interval_ms: 10_000,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_storage_root() -> PathBuf {
    PathBuf::from("storage")
}
fn d_1000() -> u64 {
    1_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_60000() -> u64 {
    60_000
}
