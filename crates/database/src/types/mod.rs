//! Shared types for the database layer

pub mod errors;

pub use errors::StoreError;

/// Result alias for message store operations
pub type StoreResult<T> = Result<T, StoreError>;
