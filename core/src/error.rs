//! Error taxonomy.
//!
//! [`BookingError`] is what callers of the booking service see. Storage
//! adapters return [`StoreError`], which converts into [`BookingError`] via
//! `From` so service code can use `?` directly.

use thiserror::Error;

/// User-facing error returned by every booking operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed input (e.g. `start >= end`, invalid resource fields)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource or reservation does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is neither owner nor admin
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Overlap, invalid state transition, or duplicate request in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unexpected infrastructure failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Stable machine-readable kind, used as a log/metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

/// Errors raised by storage adapters (relational store, key-value store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Active reservation overlaps the requested range (exclusion violation)
    #[error("Overlapping active reservation: {0}")]
    Overlap(String),

    /// Referenced resource does not exist (foreign-key violation)
    #[error("Resource does not exist: {0}")]
    ResourceMissing(String),

    /// Any other relational database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Key-value store failure
    #[error("Key-value store error: {0}")]
    KeyValue(String),

    /// Payload (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Overlap(_) => {
                Self::Conflict("apartment already booked for these dates".to_string())
            },
            StoreError::ResourceMissing(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
