//! Cron expression parsing and evaluation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use jobmill_core::error::{AppError, ErrorKind};
use jobmill_core::result::AppResult;

/// Parse a 5- or 6-field cron expression.
///
/// 5-field expressions have minute granularity; 6-field expressions carry a
/// leading seconds field. Fields are space- or tab-delimited. Any other
/// field count is a format error naming the offending expression.
pub fn parse_cron(expression: &str) -> AppResult<Schedule> {
    let tokens: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match tokens.len() {
        5 => format!("0 {}", tokens.join(" ")),
        6 => tokens.join(" "),
        count => {
            return Err(AppError::schedule(format!(
                "Cron expression '{expression}' has {count} fields, expected 5 or 6"
            )));
        }
    };

    Schedule::from_str(&normalized).map_err(|e| {
        AppError::with_source(
            ErrorKind::Schedule,
            format!("Malformed cron expression '{expression}': {e}"),
            e,
        )
    })
}

/// The next occurrence of `schedule` strictly after `after`, evaluated in
/// `time_zone`. `None` when the schedule has no further occurrences.
pub fn next_occurrence(
    schedule: &Schedule,
    after: DateTime<Utc>,
    time_zone: Tz,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&time_zone))
        .next()
        .map(|occurrence| occurrence.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expression_has_minute_granularity() {
        let schedule = parse_cron("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            next_occurrence(&schedule, after, chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 5, 0).unwrap())
        );
    }

    #[test]
    fn test_six_field_expression_has_second_granularity() {
        let schedule = parse_cron("*/30 * * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            next_occurrence(&schedule, after, chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 30).unwrap())
        );
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        let schedule = parse_cron("0 * * * *").unwrap();
        let on_boundary = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        assert_eq!(
            next_occurrence(&schedule, on_boundary, chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_tab_delimited_fields_accepted() {
        assert!(parse_cron("*/5\t*\t*\t*\t*").is_ok());
    }

    #[test]
    fn test_wrong_field_count_names_expression() {
        for expression in ["* * * *", "0 0 * * * * 2026"] {
            let err = parse_cron(expression).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Schedule);
            assert!(err.message.contains(expression));
        }
    }

    #[test]
    fn test_evaluation_respects_time_zone() {
        // 09:00 local in Prague is 08:00 UTC in winter.
        let schedule = parse_cron("0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let tz: Tz = "Europe/Prague".parse().unwrap();
        assert_eq!(
            next_occurrence(&schedule, after, tz),
            Some(Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap())
        );
    }
}
