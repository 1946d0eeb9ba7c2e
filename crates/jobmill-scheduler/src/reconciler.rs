//! Recurring schedule reconciler.
//!
//! Rebuilds a recurring job definition from its persisted field snapshot,
//! decides which firing instants are due against the misfire policy, and
//! reports the minimal field diff to write back.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_entity::recurring::snapshot::{fields, format_instant};
use jobmill_entity::recurring::{FieldDiff, FieldSnapshot, JobInvocation, MisfirePolicy};

use crate::cron::{next_occurrence, parse_cron};
use crate::timezone::resolve_time_zone;

/// Schema version written when a definition that predates versioning is
/// rewritten.
const SCHEMA_VERSION: i32 = 2;

/// A recurring job definition projected from its persisted snapshot,
/// carrying the reconciliation behavior.
///
/// Constructed fresh from a loaded snapshot plus "now" each time it is
/// needed; all mutation flows through the operations below, and the caller
/// persists the returned diff. Recoverable parse failures in the snapshot
/// (cron text, time-zone id, job payload, stored instants) are collected
/// and surfaced on the first scheduling attempt rather than at
/// construction.
///
/// Note on `strict` misfire reconciliation: every individually missed
/// instant since the last execution is replayed, however long the outage.
/// There is deliberately no cap; operators who need one should use the
/// `relaxed` or `ignorable` policy instead.
#[derive(Debug)]
pub struct RecurringSchedule {
    id: String,
    queue: Option<String>,
    cron_expression: Option<String>,
    schedule: Option<Schedule>,
    time_zone_id: Option<String>,
    time_zone: Tz,
    job: Option<JobInvocation>,
    created_at: DateTime<Utc>,
    last_execution: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
    last_job_id: Option<String>,
    misfire_policy: MisfirePolicy,
    schema_version: Option<i32>,
    retry_attempt: i32,
    errors: Vec<AppError>,
    snapshot: FieldSnapshot,
    now: DateTime<Utc>,
}

impl RecurringSchedule {
    /// Build a definition from its persisted field snapshot.
    ///
    /// An empty id or an unsupported misfire code fails construction
    /// outright — the persisted data is not something this component
    /// understands. Everything else that fails to parse is collected into
    /// the deferred error list. A missing `created_at` defaults to `now`,
    /// establishing the schedule's origin point.
    pub fn from_snapshot(
        id: &str,
        snapshot: FieldSnapshot,
        now: DateTime<Utc>,
        default_time_zone: Tz,
    ) -> AppResult<Self> {
        if id.is_empty() {
            return Err(AppError::validation("Recurring job id must not be empty"));
        }

        let misfire_policy = MisfirePolicy::from_code(snapshot.get(fields::MISFIRE))?;

        let mut errors = Vec::new();

        let cron_expression = snapshot.get_non_empty(fields::CRON).map(str::to_string);
        let schedule = match &cron_expression {
            Some(expression) => match parse_cron(expression) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => {
                errors.push(AppError::schedule(format!(
                    "Recurring job '{id}' has no cron expression"
                )));
                None
            }
        };

        let time_zone_id = snapshot.get_non_empty(fields::TIME_ZONE).map(str::to_string);
        let time_zone = match &time_zone_id {
            Some(zone_id) => match resolve_time_zone(zone_id) {
                Ok(tz) => tz,
                Err(e) => {
                    errors.push(e);
                    default_time_zone
                }
            },
            None => default_time_zone,
        };

        let job = match snapshot.get_non_empty(fields::JOB) {
            Some(raw) => match JobInvocation::from_json(raw) {
                Ok(job) => Some(job),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => {
                errors.push(AppError::schedule(format!(
                    "Recurring job '{id}' has no job payload"
                )));
                None
            }
        };

        let created_at = match snapshot.get_instant(fields::CREATED_AT) {
            Some(Some(instant)) => instant,
            Some(None) => {
                errors.push(AppError::serialization(format!(
                    "Recurring job '{id}' has a malformed created_at"
                )));
                now
            }
            None => now,
        };

        let last_execution = match snapshot.get_instant(fields::LAST_EXECUTION) {
            Some(Some(instant)) => Some(instant),
            Some(None) => {
                errors.push(AppError::serialization(format!(
                    "Recurring job '{id}' has a malformed last_execution"
                )));
                None
            }
            None => None,
        };

        let next_execution = snapshot.get_instant(fields::NEXT_EXECUTION).flatten();

        let schema_version = snapshot
            .get_non_empty(fields::VERSION)
            .and_then(|v| v.parse().ok());
        let retry_attempt = snapshot
            .get_non_empty(fields::RETRY_ATTEMPT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let queue = snapshot.get(fields::QUEUE).map(str::to_string);
        let last_job_id = snapshot.get_non_empty(fields::LAST_JOB_ID).map(str::to_string);

        Ok(Self {
            id: id.to_string(),
            queue,
            cron_expression,
            schedule,
            time_zone_id,
            time_zone,
            job,
            created_at,
            last_execution,
            next_execution,
            last_job_id,
            misfire_policy,
            schema_version,
            retry_attempt,
            errors,
            snapshot,
            now,
        })
    }

    /// Compute the trigger instants that are due at `now`.
    ///
    /// Walks forward from the last known point — the later of the last
    /// execution and `created_at` minus one second — asking the cron
    /// evaluator for the next occurrence strictly after the current point.
    /// A future candidate stops the walk and becomes `next_execution`; a
    /// candidate equal to `now` is due; an older candidate is a missed
    /// firing reconciled per the misfire policy. For `ignorable`, only
    /// misses within `[now − precision, now]` (inclusive on both ends) are
    /// kept.
    ///
    /// `next_execution` is updated as a side effect of every successful
    /// call, even when nothing is due, because it also records the next
    /// instant external due-polling should expect.
    ///
    /// Any deserialization error collected at construction surfaces here:
    /// scheduling cannot proceed on malformed input.
    pub fn due_executions(
        &mut self,
        now: DateTime<Utc>,
        precision: Duration,
    ) -> AppResult<Vec<DateTime<Utc>>> {
        if let Some(error) = self.errors.first() {
            return Err(error.clone());
        }
        let schedule = self.schedule.as_ref().ok_or_else(|| {
            AppError::schedule(format!("Recurring job '{}' has no parsed schedule", self.id))
        })?;

        // created_at minus one unit so a firing instant equal to created_at
        // fires; the instant already recorded as last_execution never
        // re-fires because the walk is strictly-after.
        let one_second = Duration::seconds(1);
        let mut origin = match self.last_execution {
            Some(last) => last.max(self.created_at - one_second),
            None => self.created_at - one_second,
        };
        let window_start = now - precision;
        let mut due = Vec::new();

        loop {
            let candidate = match next_occurrence(schedule, origin, self.time_zone) {
                Some(candidate) => candidate,
                None => {
                    self.next_execution = None;
                    break;
                }
            };

            if candidate > now {
                self.next_execution = Some(candidate);
                break;
            }
            if candidate == now {
                due.push(candidate);
                origin = now;
                continue;
            }

            // candidate < now: a missed firing.
            match self.misfire_policy {
                MisfirePolicy::Relaxed => {
                    // Collapse to one immediate catch-up firing.
                    due.push(now);
                    origin = now;
                }
                MisfirePolicy::Strict => {
                    // Replay the original missed instant, oldest first.
                    due.push(candidate);
                    origin = candidate;
                }
                MisfirePolicy::Ignorable => {
                    if candidate >= window_start {
                        due.push(candidate);
                    }
                    origin = candidate;
                }
            }
        }

        Ok(due)
    }

    /// Compute the minimal set of persisted fields to rewrite.
    ///
    /// Compares each live attribute against its last-seen serialized value
    /// in the snapshot. A cron or time-zone change forces a fresh
    /// next-execution computation seeded one second before construction-time
    /// "now" — an edited definition is treated as if it just became active.
    /// An in-memory `next_execution` that already differs from the snapshot
    /// wins without recomputation. Write side effects ride along in the
    /// diff: the schema version is bumped when the snapshot never recorded
    /// one, a stale error message is cleared, and a non-zero stored retry
    /// counter is reset.
    ///
    /// Returns `None` when neither the field diff nor `next_execution`
    /// differs from the snapshot.
    pub fn detect_changes(&mut self) -> AppResult<Option<FieldDiff>> {
        if let Some(error) = self.errors.first() {
            return Err(error.clone());
        }

        let mut changed = BTreeMap::new();

        let job_serialized = match &self.job {
            Some(job) => Some(job.to_json()?),
            None => None,
        };
        diff_field(&mut changed, &self.snapshot, fields::QUEUE, self.queue.clone());
        diff_field(
            &mut changed,
            &self.snapshot,
            fields::CRON,
            self.cron_expression.clone(),
        );
        diff_field(
            &mut changed,
            &self.snapshot,
            fields::TIME_ZONE,
            self.time_zone_id.clone(),
        );
        diff_field(&mut changed, &self.snapshot, fields::JOB, job_serialized);
        diff_field(
            &mut changed,
            &self.snapshot,
            fields::CREATED_AT,
            Some(format_instant(self.created_at)),
        );
        diff_field(
            &mut changed,
            &self.snapshot,
            fields::LAST_EXECUTION,
            self.last_execution.map(format_instant),
        );
        diff_field(
            &mut changed,
            &self.snapshot,
            fields::LAST_JOB_ID,
            self.last_job_id.clone(),
        );

        let snapshot_next = self.snapshot.get_instant(fields::NEXT_EXECUTION).flatten();
        let schedule_changed =
            changed.contains_key(fields::CRON) || changed.contains_key(fields::TIME_ZONE);

        if self.next_execution.is_some() && self.next_execution != snapshot_next {
            // An explicitly computed next execution always wins.
        } else if schedule_changed {
            let schedule = self.schedule.as_ref().ok_or_else(|| {
                AppError::schedule(format!("Recurring job '{}' has no parsed schedule", self.id))
            })?;
            self.next_execution =
                next_occurrence(schedule, self.now - Duration::seconds(1), self.time_zone);
        }

        if !self.snapshot.contains(fields::VERSION) {
            changed.insert(fields::VERSION.to_string(), SCHEMA_VERSION.to_string());
            self.schema_version = Some(SCHEMA_VERSION);
        }
        if self.snapshot.get_non_empty(fields::ERROR).is_some() {
            changed.insert(fields::ERROR.to_string(), String::new());
        }
        let stored_retry: i32 = self
            .snapshot
            .get_non_empty(fields::RETRY_ATTEMPT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if stored_retry != 0 {
            changed.insert(fields::RETRY_ATTEMPT.to_string(), "0".to_string());
            self.retry_attempt = 0;
        }

        if changed.is_empty() && self.next_execution == snapshot_next {
            return Ok(None);
        }
        Ok(Some(FieldDiff {
            fields: changed,
            next_execution: self.next_execution,
        }))
    }

    /// Schedule a retry after a transient reconciliation failure.
    ///
    /// Increments the retry counter and pushes `next_execution` out by
    /// `delay` from construction-time "now". An empty `error_message`
    /// clears the stored error rather than omitting the field.
    pub fn schedule_retry(&mut self, delay: Duration, error_message: &str) -> FieldDiff {
        self.retry_attempt += 1;
        self.next_execution = Some(self.now + delay);

        let mut changed = BTreeMap::new();
        changed.insert(
            fields::RETRY_ATTEMPT.to_string(),
            self.retry_attempt.to_string(),
        );
        changed.insert(fields::ERROR.to_string(), error_message.to_string());
        FieldDiff {
            fields: changed,
            next_execution: self.next_execution,
        }
    }

    /// Take the definition out of due-polling after an unrecoverable
    /// reconciliation failure, recording the error for operator visibility.
    pub fn disable(&mut self, error_message: &str) -> FieldDiff {
        self.next_execution = None;

        let mut changed = BTreeMap::new();
        changed.insert(fields::ERROR.to_string(), error_message.to_string());
        FieldDiff {
            fields: changed,
            next_execution: None,
        }
    }

    /// Record that a job instance was triggered for this definition.
    pub fn record_execution(&mut self, fired_at: DateTime<Utc>, job_id: impl Into<String>) {
        self.last_execution = Some(fired_at);
        self.last_job_id = Some(job_id.into());
    }

    /// Replace the target dispatch queue.
    pub fn set_queue(&mut self, queue: Option<String>) {
        self.queue = queue;
    }

    /// Replace the cron expression. The new expression must parse; a live
    /// edit fails immediately instead of being collected.
    pub fn set_cron_expression(&mut self, expression: &str) -> AppResult<()> {
        self.schedule = Some(parse_cron(expression)?);
        self.cron_expression = Some(expression.to_string());
        Ok(())
    }

    /// Replace the time zone. The new id must resolve.
    pub fn set_time_zone(&mut self, zone_id: &str) -> AppResult<()> {
        self.time_zone = resolve_time_zone(zone_id)?;
        self.time_zone_id = Some(zone_id.to_string());
        Ok(())
    }

    /// Replace the job invocation payload.
    pub fn set_job(&mut self, job: JobInvocation) {
        self.job = Some(job);
    }

    /// The definition's stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The target dispatch queue, if any.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// The deserialized job invocation, if the payload parsed.
    pub fn job(&self) -> Option<&JobInvocation> {
        self.job.as_ref()
    }

    /// The instant the definition was first constructed.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The most recent firing instant.
    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.last_execution
    }

    /// The next instant the definition is expected to fire.
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.next_execution
    }

    /// Identifier of the most recently triggered job instance.
    pub fn last_job_id(&self) -> Option<&str> {
        self.last_job_id.as_deref()
    }

    /// The misfire policy in effect.
    pub fn misfire_policy(&self) -> MisfirePolicy {
        self.misfire_policy
    }

    /// The storage schema version recorded for the definition.
    pub fn schema_version(&self) -> Option<i32> {
        self.schema_version
    }

    /// The consecutive reconciliation retry counter.
    pub fn retry_attempt(&self) -> i32 {
        self.retry_attempt
    }

    /// Errors collected while parsing the snapshot, in encounter order.
    pub fn deserialization_errors(&self) -> &[AppError] {
        &self.errors
    }
}

/// Record a live value into `changed` when it differs from the stored one.
/// An absent live value clears a previously stored one with an empty string
/// rather than omitting the field.
fn diff_field(
    changed: &mut BTreeMap<String, String>,
    snapshot: &FieldSnapshot,
    field: &str,
    live: Option<String>,
) {
    let stored = snapshot.get(field);
    match live {
        Some(value) => {
            if stored != Some(value.as_str()) {
                changed.insert(field.to_string(), value);
            }
        }
        None => {
            if stored.is_some_and(|v| !v.is_empty()) {
                changed.insert(field.to_string(), String::new());
            }
        }
    }
}
