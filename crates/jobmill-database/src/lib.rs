//! # jobmill-database
//!
//! PostgreSQL connection management and concrete repository implementations
//! for the Jobmill scheduler storage.

pub mod connection;
pub mod lock;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
