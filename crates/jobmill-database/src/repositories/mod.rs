//! Concrete repository implementations.

pub mod expiry;
pub mod recurring;

pub use expiry::ExpiryRepository;
pub use recurring::RecurringRepository;
