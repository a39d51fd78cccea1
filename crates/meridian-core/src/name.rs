//! Validated names for replication-group coordinates.
//!
//! Three newtypes identify a replica:
//!
//! - [`GroupPath`]: the coordination-store root shared by the group
//! - [`ReplicaId`]: the `shard|replica` coordinates inside the group
//! - [`HostId`]: the physical identity `host:port:uuid` used to detect two
//!   nodes claiming the same coordinates
//!
//! Validation happens at construction so the rest of the codebase can treat
//! these as always well-formed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The coordination-store path under which a replication group lives.
///
/// Always rooted at `/`, never ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupPath(String);

impl GroupPath {
    /// Creates a group path after normalizing and validating it.
    ///
    /// A trailing `/` is stripped; a missing leading `/` is added so the path
    /// composes correctly with store-side chroot prefixes.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty (or only `/`).
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let mut path = path.into();
        while path.ends_with('/') {
            path.pop();
        }
        if path.is_empty() {
            return Err(Error::invalid_name("group path must be non-empty"));
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for GroupPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The logical coordinates of a replica inside a group.
///
/// `shard` clusters replicas holding the same data; distinct `replica` names
/// identify peers within a shard. The full name renders as `shard|replica`,
/// which is also the replica's node name under the group's `replicas/`
/// directory, so neither field may contain `/` or `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaId {
    shard: String,
    replica: String,
}

impl ReplicaId {
    /// Creates a replica id after validating both fields.
    ///
    /// # Errors
    ///
    /// Returns an error if either field is empty or contains `/` or `|`.
    pub fn new(shard: impl Into<String>, replica: impl Into<String>) -> Result<Self> {
        let shard = shard.into();
        let replica = replica.into();
        for (label, value) in [("shard", &shard), ("replica", &replica)] {
            if value.is_empty() {
                return Err(Error::invalid_name(format!("{label} name must be non-empty")));
            }
            if value.contains('/') || value.contains('|') {
                return Err(Error::invalid_name(format!(
                    "{label} name {value:?} must not contain '/' or '|'"
                )));
            }
        }
        Ok(Self { shard, replica })
    }

    /// Parses a full name of the form `shard|replica`.
    ///
    /// Full names come from the coordination store, so a malformed one is a
    /// logical error (corrupted registration), not a caller mistake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logical`] unless the name contains exactly one `|`
    /// with valid parts on both sides.
    pub fn parse_full_name(name: &str) -> Result<Self> {
        let mut parts = name.split('|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(shard), Some(replica), None) => Self::new(shard, replica)
                .map_err(|_| Error::logical(format!("incorrect replica identifier: {name:?}"))),
            _ => Err(Error::logical(format!(
                "incorrect replica identifier: {name:?}"
            ))),
        }
    }

    /// Returns the shard name.
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Returns the replica name.
    #[must_use]
    pub fn replica(&self) -> &str {
        &self.replica
    }

    /// Returns the full name `shard|replica`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}|{}", self.shard, self.replica)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.shard, self.replica)
    }
}

/// The physical identity of a node hosting a replica.
///
/// Two nodes registering the same [`ReplicaId`] are told apart by comparing
/// host ids; a mismatch means the name is already taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostId {
    /// Fully qualified host name.
    pub host: String,
    /// TCP port the node serves on.
    pub port: u16,
    /// UUID of the local database backing the replica.
    pub uuid: Uuid,
}

impl HostId {
    /// Creates a host id from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, uuid: Uuid) -> Self {
        Self {
            host: host.into(),
            port,
            uuid,
        }
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.uuid)
    }
}

impl FromStr for HostId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(host), Some(port), Some(uuid)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_name(format!(
                "host id {s:?} must have the form host:port:uuid"
            )));
        };
        if host.is_empty() {
            return Err(Error::invalid_name(format!("host id {s:?} has empty host")));
        }
        let port = port
            .parse()
            .map_err(|_| Error::invalid_name(format!("host id {s:?} has invalid port")))?;
        let uuid = Uuid::parse_str(uuid)
            .map_err(|_| Error::invalid_name(format!("host id {s:?} has invalid uuid")))?;
        Ok(Self {
            host: host.to_string(),
            port,
            uuid,
        })
    }
}
