//! Recurring-schedule reconciliation configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the recurring schedule reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA time-zone id applied to definitions that carry none.
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
    /// Trailing window in seconds within which an `ignorable` missed firing
    /// is still considered due.
    #[serde(default = "default_misfire_precision")]
    pub misfire_precision_seconds: u64,
    /// Delay in seconds before a definition whose recomputation failed
    /// transiently is retried.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_time_zone: default_time_zone(),
            misfire_precision_seconds: default_misfire_precision(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_misfire_precision() -> u64 {
    60
}

fn default_retry_delay() -> u64 {
    60
}
