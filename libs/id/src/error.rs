//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{kind} ID cannot be empty")]
    Empty { kind: &'static str },

    /// The ID exceeds the maximum length.
    #[error("{kind} ID too long: {actual} bytes (max {max})")]
    TooLong {
        kind: &'static str,
        max: usize,
        actual: usize,
    },

    /// The ID contains whitespace or a control character.
    #[error("{kind} ID contains invalid character {ch:?}")]
    InvalidCharacter { kind: &'static str, ch: char },

    /// The ID does not follow the expected structure.
    #[error("invalid {kind} ID format: {message}")]
    InvalidFormat {
        kind: &'static str,
        message: String,
    },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns the kind of ID that failed to parse.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::TooLong { kind, .. }
            | IdError::InvalidCharacter { kind, .. }
            | IdError::InvalidFormat { kind, .. } => kind,
        }
    }
}
