//! Error types for the gateway layer

use thiserror::Error;

/// Identity verification failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or empty token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,
}

/// Errors raised while handling a connection's events
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection outbox closed")]
    ChannelClosed,

    #[error("store error: {0}")]
    Store(#[from] courier_database::StoreError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelClosed
    }
}
