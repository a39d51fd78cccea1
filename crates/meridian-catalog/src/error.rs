//! Error types for the replicated schema catalog.

use meridian_coord::CoordError;
use thiserror::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors surfaced by the replicated schema catalog.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The caller passed arguments that can never work (empty names, illegal
    /// characters, unknown database).
    #[error("bad arguments: {message}")]
    BadArguments {
        /// Description of the bad argument.
        message: String,
    },

    /// A different host already registered the same `shard|replica` name.
    #[error(
        "replica {replica} of replicated database at {group} already exists; \
         stored host id {stored}, current host id {current}"
    )]
    ReplicaAlreadyExists {
        /// The contested full replica name.
        replica: String,
        /// The group the replica belongs to.
        group: String,
        /// Host id stored in the coordination store.
        stored: String,
        /// Host id of the node attempting to register.
        current: String,
    },

    /// The statement cannot be accepted in this form (relayed query,
    /// self-rename, and similar caller mistakes).
    #[error("incorrect query: {message}")]
    IncorrectQuery {
        /// Description of the rejection.
        message: String,
    },

    /// The statement is valid but not supported by a replicated database.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Description of the unsupported operation.
        message: String,
    },

    /// A named table does not exist.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// The missing table name.
        table: String,
    },

    /// A named database does not exist.
    #[error("unknown database: {database}")]
    UnknownDatabase {
        /// The missing database name.
        database: String,
    },

    /// An internal invariant was violated; a bug signal, not recoverable by
    /// the caller.
    #[error("logical error: {message}")]
    Logical {
        /// Description of the violated invariant.
        message: String,
    },

    /// Replication cannot proceed safely; operator intervention required.
    #[error("database replication failed: {message}")]
    ReplicationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Coordination-store races could not be resolved within the retry
    /// budget; the operation may be retried by the caller.
    #[error("cannot get a consistent coordination snapshot after {attempts} attempts")]
    ConnectionTriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// The wait for replica acknowledgements timed out. The entry is already
    /// committed to the log and will still converge.
    #[error("timed out waiting for replicas to finish: {unfinished:?}")]
    StatusWaitTimeout {
        /// Replicas that had not acknowledged by the deadline.
        unfinished: Vec<String>,
    },

    /// A coordination-store operation failed.
    #[error("coordination store error: {0}")]
    Coordination(#[from] CoordError),
}

impl ReplicationError {
    /// Creates a bad-arguments error.
    #[must_use]
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::BadArguments {
            message: message.into(),
        }
    }

    /// Creates an incorrect-query error.
    #[must_use]
    pub fn incorrect_query(message: impl Into<String>) -> Self {
        Self::IncorrectQuery {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error.
    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Creates a logical error.
    #[must_use]
    pub fn logical(message: impl Into<String>) -> Self {
        Self::Logical {
            message: message.into(),
        }
    }

    /// Creates an unknown-table error.
    #[must_use]
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates a replication-failed error.
    #[must_use]
    pub fn replication_failed(message: impl Into<String>) -> Self {
        Self::ReplicationFailed {
            message: message.into(),
        }
    }
}

impl From<meridian_core::Error> for ReplicationError {
    fn from(e: meridian_core::Error) -> Self {
        match e {
            meridian_core::Error::InvalidName { message } => Self::BadArguments { message },
            meridian_core::Error::Logical { message } => Self::Logical { message },
            // Unparseable stored state is an invariant violation, not a
            // caller mistake.
            meridian_core::Error::Serialization { message } => Self::Logical { message },
        }
    }
}
