//! Error types for the message store

use thiserror::Error;

/// Message store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Message not found")]
    MessageNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// True for rejections caused by the request rather than the storage layer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_) | StoreError::MessageNotFound | StoreError::PermissionDenied
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
