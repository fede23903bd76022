//! Immutable, multi-indexed topology snapshots
//!
//! A [`TopologySnapshot`] maps shard identity, replica-set name, host, and
//! connection string to shared [`Shard`] handles. Snapshots are never
//! mutated after publication; every update builds a new snapshot, and old
//! ones stay alive for as long as any reader holds them.

use crate::catalog::CatalogClient;
use crate::shard::{Shard, ShardFactory};
use serde::Serialize;
use shardroute_common::{ConnectionString, HostAndPort, Result, ShardId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One immutable, fully self-consistent view of the shard topology
#[derive(Clone, Debug, Default)]
pub struct TopologySnapshot {
    by_id: HashMap<ShardId, Arc<Shard>>,
    by_replica_set: HashMap<String, Arc<Shard>>,
    by_host: HashMap<HostAndPort, Arc<Shard>>,
    by_connection_string: HashMap<ConnectionString, Arc<Shard>>,
}

impl TopologySnapshot {
    /// Build a snapshot containing only the config-server shard
    ///
    /// Used before the first successful catalog fetch.
    #[must_use]
    pub fn with_config_shard_only(config_shard: Arc<Shard>) -> Self {
        let mut snapshot = Self::default();
        snapshot.insert(config_shard);
        snapshot
    }

    /// Build a snapshot from the catalog's current shard list
    ///
    /// Returns the snapshot paired with the authority's topology timestamp.
    /// A handle from `previous` is reused whenever the shard's connection
    /// string is unchanged; otherwise the factory builds a new one. A factory
    /// failure aborts the whole fetch.
    pub async fn from_catalog(
        catalog: &dyn CatalogClient,
        factory: &dyn ShardFactory,
        previous: Option<&TopologySnapshot>,
    ) -> Result<(Self, u64)> {
        let (documents, topology_time) = catalog.list_shards().await?;

        let mut snapshot = Self::default();
        for doc in documents {
            let reusable = previous
                .and_then(|p| p.by_id.get(&doc.id))
                .filter(|shard| shard.connection_string() == &doc.host)
                .cloned();
            let shard = match reusable {
                Some(shard) => shard,
                None => factory.make_shard(doc.id, doc.host)?,
            };
            snapshot.insert(shard);
        }

        debug!(
            shards = snapshot.shard_count(),
            topology_time, "built topology snapshot from catalog"
        );
        Ok((snapshot, topology_time))
    }

    /// Merge a previously cached snapshot with a freshly fetched one
    ///
    /// The authority is canonical for which shards exist: the merged identity
    /// and replica-set indices come entirely from `fresh`. Host and
    /// connection-string keys from `previous` take precedence over freshly
    /// fetched ones, re-pointed at the handle the merged snapshot holds for
    /// that shard — a reload can interleave with membership updates, and the
    /// keys those updates installed must not revert to the authority's stale
    /// host set.
    ///
    /// Also returns the shards present in `previous` but absent from
    /// `fresh`, so callers can run removal hooks exactly once per removal.
    #[must_use]
    pub fn merge(previous: &Self, fresh: &Self) -> (Self, Vec<Arc<Shard>>) {
        let mut merged = fresh.clone();

        for (connection_string, shard) in &previous.by_connection_string {
            if let Some(current) = merged.by_id.get(shard.id()).cloned() {
                merged
                    .by_connection_string
                    .insert(connection_string.clone(), current);
            }
        }
        for (host, shard) in &previous.by_host {
            if let Some(current) = merged.by_id.get(shard.id()).cloned() {
                merged.by_host.insert(host.clone(), current);
            }
        }

        let removed = previous
            .by_id
            .values()
            .filter(|shard| !merged.by_id.contains_key(shard.id()))
            .cloned()
            .collect();

        (merged, removed)
    }

    /// Duplicate this snapshot with one shard rebuilt for a new connection
    /// string
    ///
    /// The shard is located by the connection string's replica-set name; its
    /// handle is rebuilt through the factory and replaced in all four
    /// indices, with the old host and connection-string entries evicted. A
    /// connection string whose replica-set name matches no known shard is a
    /// no-op reporting no affected handle.
    pub fn with_updated_connection_string(
        &self,
        connection_string: &ConnectionString,
        factory: &dyn ShardFactory,
    ) -> Result<(Self, Option<Arc<Shard>>)> {
        let Some(set_name) = connection_string.set_name() else {
            return Ok((self.clone(), None));
        };
        let Some(existing) = self.by_replica_set.get(set_name) else {
            return Ok((self.clone(), None));
        };

        let updated = factory.make_shard(existing.id().clone(), connection_string.clone())?;
        let mut next = self.clone();
        next.insert(updated.clone());
        Ok((next, Some(updated)))
    }

    /// Look up a shard by its logical identity
    #[must_use]
    pub fn find_by_id(&self, id: &ShardId) -> Option<Arc<Shard>> {
        self.by_id.get(id).cloned()
    }

    /// Look up a shard by its replica-set name
    #[must_use]
    pub fn find_by_replica_set_name(&self, name: &str) -> Option<Arc<Shard>> {
        self.by_replica_set.get(name).cloned()
    }

    /// Look up the shard containing the node at the given address
    #[must_use]
    pub fn find_by_host(&self, host: &HostAndPort) -> Option<Arc<Shard>> {
        self.by_host.get(host).cloned()
    }

    /// Look up a shard by connection string
    #[must_use]
    pub fn find_by_connection_string(
        &self,
        connection_string: &ConnectionString,
    ) -> Option<Arc<Shard>> {
        self.by_connection_string.get(connection_string).cloned()
    }

    /// All known shard ids, sorted
    #[must_use]
    pub fn all_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<_> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All known shard handles
    #[must_use]
    pub fn all_shards(&self) -> Vec<Arc<Shard>> {
        self.by_id.values().cloned().collect()
    }

    /// Number of shards in this snapshot
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.by_id.len()
    }

    /// Diagnostic dump of all four indices
    #[must_use]
    pub fn to_report(&self) -> SnapshotReport {
        SnapshotReport {
            shards: self
                .by_id
                .iter()
                .map(|(id, shard)| (id.to_string(), shard.connection_string().to_string()))
                .collect(),
            replica_sets: self
                .by_replica_set
                .iter()
                .map(|(name, shard)| (name.clone(), shard.id().to_string()))
                .collect(),
            hosts: self
                .by_host
                .iter()
                .map(|(host, shard)| (host.to_string(), shard.id().to_string()))
                .collect(),
            connection_strings: self
                .by_connection_string
                .iter()
                .map(|(cs, shard)| (cs.to_string(), shard.id().to_string()))
                .collect(),
        }
    }

    /// Put a shard into all four indices
    ///
    /// If a shard with the same id is already present under a different
    /// connection string, its host and connection-string entries are evicted
    /// first.
    fn insert(&mut self, shard: Arc<Shard>) {
        if let Some(existing) = self.by_id.get(shard.id()).cloned() {
            let old = existing.connection_string();
            if old != shard.connection_string() {
                for host in old.hosts() {
                    self.by_host.remove(host);
                }
                self.by_connection_string.remove(old);
            }
        }

        if let Some(name) = shard.replica_set_name() {
            self.by_replica_set.insert(name.to_string(), shard.clone());
        }
        for host in shard.connection_string().hosts() {
            self.by_host.insert(host.clone(), shard.clone());
        }
        self.by_connection_string
            .insert(shard.connection_string().clone(), shard.clone());
        self.by_id.insert(shard.id().clone(), shard);
    }
}

/// Diagnostic view of a snapshot's indices
#[derive(Debug, Serialize)]
pub struct SnapshotReport {
    /// Shard id -> connection string
    pub shards: BTreeMap<String, String>,
    /// Replica-set name -> shard id
    pub replica_sets: BTreeMap<String, String>,
    /// Host -> shard id
    pub hosts: BTreeMap<String, String>,
    /// Connection string -> shard id
    pub connection_strings: BTreeMap<String, String>,
}
