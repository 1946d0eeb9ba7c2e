//! Time-driven maintenance core for Jobmill.
//!
//! This crate provides:
//! - A recurring schedule reconciler that decides which firing instants are
//!   due, reconciles missed firings against the misfire policy, and reports
//!   field-level diffs to persist
//! - An expiry sweeper that purges expired records from the shared store in
//!   bounded batches under a distributed lock
//! - Cron-expression and time-zone evaluation helpers shared by both

pub mod cron;
pub mod reconciler;
pub mod sweeper;
pub mod timezone;

pub use reconciler::RecurringSchedule;
pub use sweeper::ExpirySweeper;
