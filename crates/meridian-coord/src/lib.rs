//! # meridian-coord
//!
//! Client contract for the strongly-consistent coordination store that backs
//! a replication group, plus an in-memory implementation for tests.
//!
//! The store is a hierarchy of *nodes*, each holding a small text value and
//! two counters: `version` (bumped on data writes) and `cversion` (bumped on
//! child-list changes). The contract requires:
//!
//! - sequential create modes with per-parent strictly increasing suffixes
//! - ephemeral nodes reaped when the owning session closes
//! - atomic multi-ops over create/set/remove/check
//! - child-list watches
//!
//! ## Example
//!
//! ```rust
//! use meridian_coord::{CoordError, Coordinator, CreateMode, MemoryCoordination};
//!
//! # async fn demo() -> Result<(), CoordError> {
//! let store = MemoryCoordination::new();
//! let session = store.session();
//! session.create("/app", "", CreateMode::Persistent).await?;
//! let created = session
//!     .create("/app/item-", "payload", CreateMode::PersistentSequential)
//!     .await?;
//! assert_eq!(created, "/app/item-0000000000");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{ChildrenWatch, Coordinator};
pub use error::{CoordError, Result};
pub use memory::{MemoryCoordination, MemorySession};
pub use types::{CreateMode, Op, OpResult, Stat};
