//! # meridian-core
//!
//! Core abstractions shared by all meridian components:
//!
//! - **Names**: validated coordinates of a replica inside a replication group
//! - **DDL Model**: the replicable schema statements and canonical object
//!   definitions stored in the authoritative catalog
//! - **Escaping**: the filename escaping used for catalog metadata keys
//! - **Error Types**: shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `meridian-core` defines the vocabulary; it performs no I/O. Anything that
//! talks to the coordination store lives in `meridian-coord`, and the
//! replication machinery itself lives in `meridian-catalog`.
//!
//! ## Example
//!
//! ```rust
//! use meridian_core::prelude::*;
//!
//! let group = GroupPath::new("/clusters/analytics")?;
//! let replica = ReplicaId::new("s1", "r1")?;
//! assert_eq!(replica.full_name(), "s1|r1");
//! # Ok::<(), meridian_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod ddl;
pub mod error;
pub mod escape;
pub mod name;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::ddl::{
        AlterCommand, ColumnDefinition, DdlStatement, TableDefinition, TableEngine,
    };
    pub use crate::error::{Error, Result};
    pub use crate::name::{GroupPath, HostId, ReplicaId};
}

// Re-export key types at crate root for ergonomics
pub use ddl::{AlterCommand, ColumnDefinition, DdlStatement, TableDefinition, TableEngine};
pub use error::{Error, Result};
pub use escape::{escape_for_file_name, unescape_for_file_name};
pub use name::{GroupPath, HostId, ReplicaId};
pub use observability::{init_logging, LogFormat};
