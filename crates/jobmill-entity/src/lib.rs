//! # jobmill-entity
//!
//! Domain entity models for Jobmill: the persisted recurring-job field
//! snapshot, the misfire policy enumeration, and the job invocation payload.

pub mod recurring;
