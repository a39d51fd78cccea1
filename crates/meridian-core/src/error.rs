//! Error types and result aliases shared across meridian components.

/// The result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core vocabulary types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A name failed validation (empty, illegal characters, bad shape).
    #[error("invalid name: {message}")]
    InvalidName {
        /// Description of what made the name invalid.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal invariant was violated; this signals a bug or corrupted
    /// stored state, not a caller mistake.
    #[error("logical error: {message}")]
    Logical {
        /// Description of the violated invariant.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-name error.
    #[must_use]
    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::InvalidName {
            message: message.into(),
        }
    }

    /// Creates a new logical error.
    #[must_use]
    pub fn logical(message: impl Into<String>) -> Self {
        Self::Logical {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
