//! Misfire policy enumeration.

use std::fmt;

use serde::{Deserialize, Serialize};

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;

/// Policy for reconciling scheduled firing instants that were missed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisfirePolicy {
    /// Collapse any number of missed firings into one immediate firing.
    #[default]
    Relaxed,
    /// Replay every individually missed instant, oldest first.
    Strict,
    /// Fire only misses within a small trailing window, drop older ones.
    Ignorable,
}

impl MisfirePolicy {
    /// Parse the persisted policy code. An absent or blank code defaults to
    /// `Relaxed`; any unrecognized code is an unsupported-option error that
    /// fails definition construction outright.
    pub fn from_code(code: Option<&str>) -> AppResult<Self> {
        match code {
            None | Some("") => Ok(Self::Relaxed),
            Some("relaxed") => Ok(Self::Relaxed),
            Some("strict") => Ok(Self::Strict),
            Some("ignorable") => Ok(Self::Ignorable),
            Some(other) => Err(AppError::validation(format!(
                "Unsupported misfire policy '{other}'"
            ))),
        }
    }

    /// The persisted policy code.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Relaxed => "relaxed",
            Self::Strict => "strict",
            Self::Ignorable => "ignorable",
        }
    }
}

impl fmt::Display for MisfirePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_codes() {
        assert_eq!(
            MisfirePolicy::from_code(Some("relaxed")).unwrap(),
            MisfirePolicy::Relaxed
        );
        assert_eq!(
            MisfirePolicy::from_code(Some("strict")).unwrap(),
            MisfirePolicy::Strict
        );
        assert_eq!(
            MisfirePolicy::from_code(Some("ignorable")).unwrap(),
            MisfirePolicy::Ignorable
        );
    }

    #[test]
    fn test_absent_or_blank_defaults_to_relaxed() {
        assert_eq!(MisfirePolicy::from_code(None).unwrap(), MisfirePolicy::Relaxed);
        assert_eq!(
            MisfirePolicy::from_code(Some("")).unwrap(),
            MisfirePolicy::Relaxed
        );
    }

    #[test]
    fn test_unrecognized_code_is_an_error() {
        let err = MisfirePolicy::from_code(Some("lenient")).unwrap_err();
        assert!(err.message.contains("lenient"));
    }
}
