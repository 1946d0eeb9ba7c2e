//! # jobmill-core
//!
//! Core crate for Jobmill. Contains configuration schemas, the seams the
//! maintenance components are written against, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Jobmill crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
