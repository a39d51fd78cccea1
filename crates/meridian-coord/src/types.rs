//! Request and response types for the coordination-store contract.

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Survives the creating session; a strictly increasing 10-digit suffix
    /// is appended to the requested path.
    PersistentSequential,
    /// Removed when the creating session closes.
    Ephemeral,
    /// Ephemeral with the sequential suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the store appends a sequence suffix to the requested path.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }

    /// Whether the node is tied to the creating session's lifetime.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }
}

/// Node metadata counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Bumped on every data write to the node.
    pub version: i64,
    /// Bumped on every change to the node's child list.
    pub cversion: i64,
}

/// One request inside an atomic multi-op.
#[derive(Debug, Clone)]
pub enum Op {
    /// Create a node.
    Create {
        /// Path to create (prefix for sequential modes).
        path: String,
        /// Initial value.
        data: String,
        /// Create mode.
        mode: CreateMode,
    },
    /// Write a node's value.
    Set {
        /// Path to write.
        path: String,
        /// New value.
        data: String,
        /// Required current version, or `None` to write unconditionally.
        version: Option<i64>,
    },
    /// Remove a node.
    Remove {
        /// Path to remove.
        path: String,
        /// Required current version, or `None` to remove unconditionally.
        version: Option<i64>,
    },
    /// Assert a node's version without changing anything.
    Check {
        /// Path to check.
        path: String,
        /// Required current version.
        version: i64,
    },
}

impl Op {
    /// A persistent create.
    #[must_use]
    pub fn create(path: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Create {
            path: path.into(),
            data: data.into(),
            mode: CreateMode::Persistent,
        }
    }

    /// An unconditional set.
    #[must_use]
    pub fn set(path: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Set {
            path: path.into(),
            data: data.into(),
            version: None,
        }
    }

    /// An unconditional remove.
    #[must_use]
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove {
            path: path.into(),
            version: None,
        }
    }

    /// Returns the path this op targets.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. }
            | Self::Set { path, .. }
            | Self::Remove { path, .. }
            | Self::Check { path, .. } => path,
        }
    }
}

/// The per-op outcome of a successful multi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// A node was created at the given (possibly suffixed) path.
    Created {
        /// Actual path of the created node.
        path: String,
    },
    /// A value was written.
    Set,
    /// A node was removed.
    Removed,
    /// A version check passed.
    Checked,
}
