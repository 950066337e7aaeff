//! Crate-wide error type for the Parlance stack.

use serde::{Deserialize, Serialize};

/// All errors surfaced by the session and serving layers.
///
/// Variants map onto the wire taxonomy: each carries a stable
/// machine-readable kind (via [`Error::kind`]) and an HTTP-ish status code
/// (via [`Error::code`]) so transports can render them without matching on
/// the enum themselves.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad request shape or field values, rejected before any work starts.
    #[error("Validation: {0}")]
    Validation(String),

    /// Unknown response id, call id, or input-item cursor.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Admission denied by the rate limiter. `retry_after` is whole
    /// seconds, rounded up, never zero.
    #[error("Rate limited: retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Request body, tool-output payload, or a single stream event over
    /// its configured byte cap.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Cumulative stream buffer exceeded its configured byte cap.
    #[error("Stream buffer overflow: {0}")]
    Overflow(String),

    /// Tool-output wait (or another bounded wait) expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected engine or processing failure.
    #[error("Internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable wire identifier for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "invalid_request_error",
            Error::NotFound(_) => "not_found_error",
            Error::RateLimited { .. } => "rate_limit_error",
            Error::PayloadTooLarge(_) => "payload_too_large_error",
            Error::Overflow(_) => "stream_overflow_error",
            Error::Timeout(_) => "timeout_error",
            Error::Json(_) => "invalid_request_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code a transport should use for this error.
    pub fn code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Json(_) => 400,
            Error::NotFound(_) => 404,
            Error::RateLimited { .. } => 429,
            Error::PayloadTooLarge(_) => 413,
            Error::Overflow(_) | Error::Timeout(_) | Error::Internal(_) => 500,
        }
    }

    /// Retry hint in seconds, present only for rate-limit rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// The `error` object embedded in `response.error` events and error
    /// response bodies.
    pub fn to_wire(&self) -> WireError {
        WireError {
            message: self.to_string(),
            kind: self.kind().to_string(),
            code: self.code(),
            retry_after: self.retry_after(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialized error detail, embedded in events and terminal responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
