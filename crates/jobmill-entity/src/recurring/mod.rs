//! Recurring-job definition entities.

pub mod misfire;
pub mod payload;
pub mod snapshot;

pub use misfire::MisfirePolicy;
pub use payload::JobInvocation;
pub use snapshot::{fields, FieldDiff, FieldSnapshot};
