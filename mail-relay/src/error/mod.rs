//! Error types and error handling
//!
//! Each stage of a delivery attempt has its own error type. Those are
//! recovered inside the relay loop and only ever reach the caller as the
//! `info` text of the outcome. [`RequestError`] is the one error type that
//! becomes an HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::rotation::SenderId;

/// Shared counter could not be advanced
#[derive(Debug, Error)]
pub enum RotationError {
    /// No connection could be checked out of the pool
    #[error("connection pool: {0}")]
    Pool(String),

    /// The store rejected the script or is unreachable
    #[error("{0}")]
    Store(#[from] redis::RedisError),

    /// The stored counter is outside `1..=pool_size`
    #[error("counter value {value} is outside 1..={pool_size}")]
    OutOfRange {
        /// Value returned by the store
        value: i64,
        /// Configured pool size
        pool_size: u32,
    },
}

/// Sender credentials could not be loaded
///
/// Connection failures, missing rows and decode failures all collapse into
/// this single variant; callers only propagate the message.
#[derive(Debug, Error)]
#[error("configuration unavailable for sender {sender_id}: {reason}")]
pub struct CredentialError {
    /// Sender whose row was requested
    pub sender_id: SenderId,
    /// Underlying cause
    pub reason: String,
}

impl CredentialError {
    /// Create a credential error for `sender_id`
    #[must_use]
    pub fn unavailable<T: ToString>(sender_id: SenderId, reason: T) -> Self {
        Self {
            sender_id,
            reason: reason.to_string(),
        }
    }
}

/// SMTP transaction failed
#[derive(Debug, Error)]
#[error("Message could not be sent. Mailer Error: {0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    /// Create a delivery error from a cause
    #[must_use]
    pub fn new<T: ToString>(cause: T) -> Self {
        Self(cause.to_string())
    }
}

/// Audit record could not be written
#[derive(Debug, Error)]
pub enum AuditError {
    /// No connection could be checked out of the pool
    #[error("connection pool: {0}")]
    Pool(String),

    /// HSET or EXPIRE failed
    #[error("{0}")]
    Store(#[from] redis::RedisError),
}

/// Malformed or unsupported inbound request
#[derive(Debug, Error)]
pub enum RequestError {
    /// Method other than GET or POST
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// JSON body could not be decoded
    #[error("Invalid JSON format")]
    InvalidJson,

    /// Multipart body could not be decoded
    #[error("Multipart parse error")]
    Multipart,

    /// Query string or urlencoded body could not be decoded
    #[error("Form parse error")]
    Form,

    /// `user` field missing or empty
    #[error("Missing recipient")]
    MissingRecipient,
}

impl RequestError {
    /// HTTP status for this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidJson | Self::Multipart | Self::Form | Self::MissingRecipient => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self, "Rejected request");
        (self.status(), self.to_string()).into_response()
    }
}
