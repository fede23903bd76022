//! Catalog client interface
//!
//! The catalog is the strongly consistent authority for which shards exist.
//! The registry never talks to it directly except through this trait, so
//! tests and alternative metadata stores can stand in for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shardroute_common::{ConnectionString, Result, ShardId};

/// One shard as described by the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDocument {
    /// The shard's logical identity
    pub id: ShardId,
    /// How to reach the shard, as last recorded by the authority
    pub host: ConnectionString,
}

impl ShardDocument {
    /// Create a new shard document
    #[must_use]
    pub fn new(id: ShardId, host: ConnectionString) -> Self {
        Self { id, host }
    }
}

/// Client for the authoritative shard catalog
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the current shard list and the authority's topology timestamp
    ///
    /// The timestamp is monotonically non-decreasing across calls. Failures
    /// surface as [`shardroute_common::Error::CatalogFetch`] and are not
    /// retried here; retry policy belongs to the caller.
    async fn list_shards(&self) -> Result<(Vec<ShardDocument>, u64)>;
}
