//! Contract between the expiry sweeper and the shared store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::result::AppResult;

/// Expirable record categories, in sweep order.
///
/// The order matters: later categories may hold rows whose existence depends
/// on earlier ones not yet purged, so deleting in this order minimizes
/// orphaned-row transient states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryCategory {
    /// Aggregated counter rows.
    Counters,
    /// Finished job rows past their expiry.
    Jobs,
    /// List entries.
    Lists,
    /// Set entries.
    Sets,
    /// Hash field rows.
    Hashes,
}

impl ExpiryCategory {
    /// All categories in the order a sweep pass processes them.
    pub const ALL: [ExpiryCategory; 5] = [
        ExpiryCategory::Counters,
        ExpiryCategory::Jobs,
        ExpiryCategory::Lists,
        ExpiryCategory::Sets,
        ExpiryCategory::Hashes,
    ];

    /// The backing table name for this category.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Counters => "counters",
            Self::Jobs => "jobs",
            Self::Lists => "lists",
            Self::Sets => "sets",
            Self::Hashes => "hashes",
        }
    }
}

impl fmt::Display for ExpiryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

/// Store-side operations the expiry sweeper is written against.
///
/// The lock pair is a distributed mutual-exclusion primitive shared by all
/// cooperating server processes, not an in-process lock. Acquisition failure
/// within `timeout` must surface as a lock-timeout error carrying the
/// contended resource key.
#[async_trait]
pub trait ExpiryStore: Send + Sync + fmt::Debug {
    /// Acquire the named distributed lock, waiting up to `timeout`.
    async fn acquire_lock(&self, resource: &str, timeout: Duration) -> AppResult<()>;

    /// Release the named distributed lock.
    async fn release_lock(&self, resource: &str) -> AppResult<()>;

    /// Delete up to `limit` rows of `category` whose expiry timestamp is
    /// older than `now`. Returns the number of rows actually removed.
    async fn delete_expired(
        &self,
        category: ExpiryCategory,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<u64>;

    /// Delete up to `limit` job state-history rows created before `cutoff`
    /// that are no longer referenced as the owning job's current state.
    /// Returns the number of rows actually removed.
    async fn delete_superseded_states(&self, cutoff: DateTime<Utc>, limit: u32) -> AppResult<u64>;
}
