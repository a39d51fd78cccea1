//! Error types for coordination-store operations.

use thiserror::Error;

/// Result type alias for coordination-store operations.
pub type Result<T> = std::result::Result<T, CoordError>;

/// Errors surfaced by a coordination store.
///
/// The first four mirror the store's own failure vocabulary and are often
/// expected outcomes (e.g. `NodeExists` when racing to create a group);
/// `Unavailable` covers connection-class failures.
#[derive(Debug, Clone, Error)]
pub enum CoordError {
    /// The node (or a required parent) does not exist.
    #[error("no node: {path}")]
    NoNode {
        /// Path that was missing.
        path: String,
    },

    /// The node already exists.
    #[error("node already exists: {path}")]
    NodeExists {
        /// Path that already existed.
        path: String,
    },

    /// A versioned write did not match the node's current version.
    #[error("version mismatch: {path}")]
    BadVersion {
        /// Path whose version check failed.
        path: String,
    },

    /// The node cannot be removed because it has children.
    #[error("node has children: {path}")]
    NotEmpty {
        /// Path that still had children.
        path: String,
    },

    /// The store cannot be reached or the session is gone.
    #[error("coordination store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity failure.
        message: String,
    },
}

impl CoordError {
    /// Creates a `NoNode` error for the given path.
    #[must_use]
    pub fn no_node(path: impl Into<String>) -> Self {
        Self::NoNode { path: path.into() }
    }

    /// Creates a `NodeExists` error for the given path.
    #[must_use]
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Creates an `Unavailable` error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}
