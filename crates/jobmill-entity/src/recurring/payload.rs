//! Job invocation payload.

use serde::{Deserialize, Serialize};

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;

/// The invocation descriptor a recurring definition triggers.
///
/// Opaque to the maintenance core beyond equality and a stable serialized
/// form for field diffing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInvocation {
    /// Job type identifier the worker side dispatches on.
    pub job_type: String,
    /// Job-specific arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl JobInvocation {
    /// Decode an invocation from its stored JSON form.
    pub fn from_json(value: &str) -> AppResult<Self> {
        serde_json::from_str(value).map_err(|e| {
            AppError::with_source(
                jobmill_core::error::ErrorKind::Schedule,
                format!("Undecodable job payload: {e}"),
                e,
            )
        })
    }

    /// Encode the invocation to the stored JSON form.
    ///
    /// Serialization is stable for a given value (struct field order), so
    /// the result can be compared byte-for-byte against the snapshot.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip_is_stable() {
        let invocation = JobInvocation {
            job_type: "weekly_report".to_string(),
            args: serde_json::json!({"week": 12}),
        };
        let stored = invocation.to_json().unwrap();
        let reloaded = JobInvocation::from_json(&stored).unwrap();
        assert_eq!(reloaded, invocation);
        assert_eq!(reloaded.to_json().unwrap(), stored);
    }

    #[test]
    fn test_undecodable_payload() {
        let err = JobInvocation::from_json("{not json").unwrap_err();
        assert_eq!(err.kind, jobmill_core::error::ErrorKind::Schedule);
    }
}
