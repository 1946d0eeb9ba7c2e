//! Time-zone resolution by IANA id.

use chrono_tz::Tz;

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;

/// Resolve an IANA time-zone id.
pub fn resolve_time_zone(id: &str) -> AppResult<Tz> {
    id.parse::<Tz>()
        .map_err(|_| AppError::schedule(format!("Unknown time zone '{id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmill_core::error::ErrorKind;

    #[test]
    fn test_known_zones_resolve() {
        assert_eq!(resolve_time_zone("UTC").unwrap(), chrono_tz::UTC);
        assert!(resolve_time_zone("Europe/Prague").is_ok());
        assert!(resolve_time_zone("America/New_York").is_ok());
    }

    #[test]
    fn test_unknown_zone_is_a_schedule_error() {
        let err = resolve_time_zone("Mars/Olympus_Mons").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Schedule);
        assert!(err.message.contains("Mars/Olympus_Mons"));
    }
}
