//! Cross-crate trait seams.
//!
//! These traits are defined here so the maintenance components can be
//! written (and unit-tested) against the contract rather than against a
//! concrete store.

pub mod expiry;

pub use expiry::{ExpiryCategory, ExpiryStore};
