//! Error types for the model crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding record sets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload is not valid JSON.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },

    /// The payload is valid JSON but not an array of records.
    #[error("expected a JSON array of records, found {found}")]
    NotAnArray {
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// A record does not match the record shape.
    #[error("invalid record at index {index}: {message}")]
    InvalidRecord {
        /// Position of the record in the payload.
        index: usize,
        /// Description of the mismatch.
        message: String,
    },

    /// A `createdAt` value is not an RFC 3339 timestamp.
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// The rejected value.
        value: String,
    },

    /// Failed to encode records.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Create an invalid record error.
    pub fn invalid_record(index: usize, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            index,
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}
