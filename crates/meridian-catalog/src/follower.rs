//! The log-follower contract.
//!
//! The follower is the component that pulls log entries in order and applies
//! them locally. The replica owns its follower; the follower holds a
//! non-owning handle back to the replica (released during shutdown, replica
//! first stopping the follower). Keeping the contract minimal lets the core
//! be tested with an in-memory stub.

use async_trait::async_trait;
use meridian_core::HostId;

use crate::entry::LogEntry;
use crate::error::Result;
use crate::txn::QueryContext;

/// Contract between a replica and its log follower.
#[async_trait]
pub trait LogFollower: Send + Sync + 'static {
    /// Whether the follower ever started.
    fn is_currently_active(&self) -> bool;

    /// Stable identifier of this node, usable as an entry's initiator.
    fn common_host_id(&self) -> HostId;

    /// Appends an entry to the log, executes it locally as the initial
    /// query, and returns the created log node path.
    ///
    /// # Errors
    ///
    /// Propagates enqueue and local-execution failures. An enqueued entry
    /// stays in the log even when local execution fails; other replicas
    /// still apply it.
    async fn try_enqueue_and_execute(&self, entry: LogEntry, ctx: &QueryContext)
        -> Result<String>;

    /// Starts the follower: initial convergence, then the apply loop.
    ///
    /// # Errors
    ///
    /// Returns an error if initial convergence fails; the follower is not
    /// active afterwards.
    async fn startup(&self) -> Result<()>;

    /// Stops the apply loop between entries and waits for it to exit.
    async fn shutdown(&self);
}
