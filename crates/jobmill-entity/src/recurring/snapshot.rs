//! Persisted field snapshot of a recurring job definition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names used in the persisted `recurring_jobs` key/value rows.
pub mod fields {
    /// Target dispatch queue.
    pub const QUEUE: &str = "queue";
    /// Cron expression text (5- or 6-field).
    pub const CRON: &str = "cron";
    /// IANA time-zone id.
    pub const TIME_ZONE: &str = "time_zone";
    /// Serialized job invocation payload.
    pub const JOB: &str = "job";
    /// Instant the definition was first constructed.
    pub const CREATED_AT: &str = "created_at";
    /// Instant of the most recent firing.
    pub const LAST_EXECUTION: &str = "last_execution";
    /// Next instant the definition is expected to fire.
    pub const NEXT_EXECUTION: &str = "next_execution";
    /// Identifier of the most recently triggered job instance.
    pub const LAST_JOB_ID: &str = "last_job_id";
    /// Misfire policy code.
    pub const MISFIRE: &str = "misfire";
    /// Storage schema version.
    pub const VERSION: &str = "version";
    /// Consecutive reconciliation retry counter.
    pub const RETRY_ATTEMPT: &str = "retry_attempt";
    /// Last reconciliation error text, for operator visibility.
    pub const ERROR: &str = "error";
}

/// Serialize an instant the way snapshot fields store it.
///
/// RFC 3339, millisecond precision, `Z` suffix. The format must be stable:
/// field diffing compares re-serialized live values byte-for-byte against
/// the snapshot.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse an instant from its stored snapshot representation.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Minimal set of persisted fields to rewrite after a reconciler operation.
///
/// `next_execution` is carried separately from the field map because the
/// store indexes it for due-polling; `None` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    /// Changed field values, keyed by field name.
    pub fields: BTreeMap<String, String>,
    /// New next-execution instant, `None` when cleared.
    pub next_execution: Option<DateTime<Utc>>,
}

/// String-keyed field map of a recurring job definition as loaded from the
/// shared store.
///
/// A field can be in one of three states, and diffing logic depends on the
/// distinction: absent (no row), empty (row with `""`), or present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSnapshot(BTreeMap<String, String>);

impl FieldSnapshot {
    /// Create an empty snapshot (a definition never persisted before).
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The raw value of `field`, `None` when the row is absent.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// The value of `field`, treating absent and empty alike.
    pub fn get_non_empty(&self, field: &str) -> Option<&str> {
        self.get(field).filter(|v| !v.is_empty())
    }

    /// Whether a row exists for `field`, empty or not.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Parse `field` as a stored instant. Absent or empty yields `None`;
    /// a present but malformed value yields `Some(None)` so the caller can
    /// record a deserialization error.
    pub fn get_instant(&self, field: &str) -> Option<Option<DateTime<Utc>>> {
        self.get_non_empty(field).map(parse_instant)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// Remove a field row entirely.
    pub fn remove(&mut self, field: &str) {
        self.0.remove(field);
    }

    /// Fold a persisted field diff back into the snapshot, as the storage
    /// layer does after a successful write.
    pub fn apply(&mut self, diff: &FieldDiff) {
        for (field, value) in &diff.fields {
            self.0.insert(field.clone(), value.clone());
        }
        match diff.next_execution {
            Some(instant) => self.set(fields::NEXT_EXECUTION, format_instant(instant)),
            None => self.remove(fields::NEXT_EXECUTION),
        }
    }

    /// Iterate over all stored field rows.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the snapshot holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for FieldSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
