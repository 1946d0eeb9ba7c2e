//! Expiry sweeper configuration.

use serde::{Deserialize, Serialize};

/// Largest delete batch the store will accept without lock escalation.
pub const MAX_BATCH_SIZE: u32 = 100_000;

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether the sweeper runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of rows removed per delete statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Retention in seconds for superseded job state-history rows.
    /// Zero disables the state-history sweep entirely.
    #[serde(default)]
    pub state_retention_seconds: u64,
    /// Seconds to wait at the end of a sweep pass before returning.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Seconds to wait for the distributed lock before skipping a category.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
}

impl SweeperConfig {
    /// The configured batch size clamped to the supported range.
    pub fn effective_batch_size(&self) -> u32 {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            state_retention_seconds: 0,
            interval_seconds: default_interval(),
            lock_timeout_seconds: default_lock_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u32 {
    1000
}

fn default_interval() -> u64 {
    900
}

fn default_lock_timeout() -> u64 {
    5
}
