//! Shard handles and the factory that produces them
//!
//! A [`Shard`] is an immutable, shared handle to one routable destination.
//! Handles are produced by a [`ShardFactory`] from a connection string and
//! are shared by every topology index entry that refers to the same shard;
//! replacing a shard's connection string always builds a new handle.

use shardroute_common::{ConnectionString, Result, ShardId};
use std::fmt;
use std::sync::Arc;

/// Immutable handle to a routable shard
pub struct Shard {
    id: ShardId,
    connection_string: ConnectionString,
}

impl Shard {
    /// Create a new shard handle
    #[must_use]
    pub fn new(id: ShardId, connection_string: ConnectionString) -> Self {
        Self {
            id,
            connection_string,
        }
    }

    /// The shard's logical identity
    #[must_use]
    pub fn id(&self) -> &ShardId {
        &self.id
    }

    /// The connection string this handle was constructed with
    #[must_use]
    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    /// The replica-set name, if the shard is reached through a replica set
    #[must_use]
    pub fn replica_set_name(&self) -> Option<&str> {
        self.connection_string.set_name()
    }

    /// Whether this handle represents the config-server shard
    #[must_use]
    pub fn is_config_server(&self) -> bool {
        self.id.is_config_server()
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shard({} at {})", self.id, self.connection_string)
    }
}

/// Constructs shard handles from connection strings
///
/// Production implementations attach live targeting state to the handle;
/// construction must not perform network I/O.
pub trait ShardFactory: Send + Sync {
    /// Build a shard handle for the given identity and connection string
    fn make_shard(&self, id: ShardId, connection_string: ConnectionString) -> Result<Arc<Shard>>;
}

/// Factory that builds plain shard handles with no attached state
#[derive(Debug, Default)]
pub struct BasicShardFactory;

impl ShardFactory for BasicShardFactory {
    fn make_shard(&self, id: ShardId, connection_string: ConnectionString) -> Result<Arc<Shard>> {
        Ok(Arc::new(Shard::new(id, connection_string)))
    }
}
