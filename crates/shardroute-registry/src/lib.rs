//! ShardRoute Registry - Versioned shard-topology registry
//!
//! This crate maintains the authoritative, causally consistent mapping from
//! logical shard identity to the physical replica-set endpoints serving it,
//! and exposes the lookup API consumed by the query-routing layer.
//!
//! The moving parts:
//!
//! - [`TopologySnapshot`]: an immutable view of the topology, indexed by
//!   shard id, replica-set name, host, and connection string.
//! - [`TopologyVersion`]: the causal version stamped on every snapshot,
//!   combining the catalog's topology timestamp with local increments for
//!   stashed membership updates and forced reloads.
//! - [`VersionedCache`]: a single-entry read-through cache that coalesces
//!   concurrent refreshes onto one in-flight catalog fetch.
//! - [`ShardRegistry`]: the façade tying the above together with the
//!   membership-notification stash and the periodic background reload.

pub mod cache;
pub mod catalog;
pub mod registry;
pub mod shard;
pub mod snapshot;
pub mod version;

pub use cache::{AcquireOutcome, Fetcher, VersionedCache, VersionedValue};
pub use catalog::{CatalogClient, ShardDocument};
pub use registry::{RegistryReport, ShardRegistry, ShardRemovalHook};
pub use shard::{BasicShardFactory, Shard, ShardFactory};
pub use snapshot::{SnapshotReport, TopologySnapshot};
pub use version::{CausalVersion, TopologyVersion};
