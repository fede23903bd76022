//! The shard registry façade
//!
//! [`ShardRegistry`] maintains the process-wide view of which shards exist
//! and how to reach them. Lookups are served from an immutable cached
//! snapshot; refreshes go through the versioned cache so that at most one
//! catalog fetch is ever in flight, and out-of-band replica-set membership
//! notifications are stashed and folded into every refresh so a racing
//! reload can never revert a shard to a stale host set.
//!
//! The registry is an explicitly constructed, explicitly owned object:
//! callers create it, `init` it, and inject it where it is needed. There is
//! no hidden global instance.

use crate::cache::{AcquireOutcome, Fetcher, VersionedCache};
use crate::catalog::CatalogClient;
use crate::shard::{Shard, ShardFactory};
use crate::snapshot::{SnapshotReport, TopologySnapshot};
use crate::version::TopologyVersion;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shardroute_common::{ConnectionString, Error, HostAndPort, RegistryConfig, Result, ShardId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked once per shard that disappears from the topology
///
/// Hooks must not fail: a hook error is not recoverable and terminates the
/// process.
pub type ShardRemovalHook =
    Box<dyn Fn(&ShardId) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

type LatestConnectionStrings = Arc<RwLock<HashMap<String, ConnectionString>>>;

/// Lookup function run by the versioned cache whenever the topology is stale
struct TopologyFetcher {
    catalog: Arc<dyn CatalogClient>,
    factory: Arc<dyn ShardFactory>,
    latest_connection_strings: LatestConnectionStrings,
    removal_hooks: Vec<ShardRemovalHook>,
    is_up: Arc<AtomicBool>,
}

#[async_trait]
impl Fetcher<TopologySnapshot, TopologyVersion> for TopologyFetcher {
    async fn fetch(
        &self,
        previous: Option<Arc<TopologySnapshot>>,
        wanted: TopologyVersion,
    ) -> Result<(Arc<TopologySnapshot>, TopologyVersion)> {
        let (fresh, topology_time) =
            TopologySnapshot::from_catalog(&*self.catalog, &*self.factory, previous.as_deref())
                .await?;

        let (mut data, removed) = match previous.as_deref() {
            Some(previous) => TopologySnapshot::merge(previous, &fresh),
            None => (fresh, Vec::new()),
        };

        // Layer the stashed membership updates on top of the merge, so hosts
        // learned out-of-band win over whatever the authority reported.
        let stashed: Vec<ConnectionString> = self
            .latest_connection_strings
            .read()
            .values()
            .cloned()
            .collect();
        for connection_string in &stashed {
            let (next, updated) =
                data.with_updated_connection_string(connection_string, &*self.factory)?;
            if let Some(shard) = updated {
                debug!(shard = %shard.id(), %connection_string, "applied stashed membership update");
            }
            data = next;
        }

        for shard in &removed {
            info!(shard = %shard.id(), "shard removed from topology");
            for hook in &self.removal_hooks {
                if let Err(error) = hook(shard.id()) {
                    error!(shard = %shard.id(), %error, "shard-removal hook failed");
                    std::process::abort();
                }
            }
        }

        self.is_up.store(true, Ordering::Release);

        // Stamp with the increments captured when this fetch began; anything
        // bumped mid-flight stays ahead and triggers the next fetch.
        let time = TopologyVersion::new(
            topology_time.max(wanted.topology_time()),
            wanted.membership_increment(),
            wanted.force_reload_increment(),
        );
        info!(shards = data.shard_count(), ?time, "shard topology refreshed");
        Ok((Arc::new(data), time))
    }
}

/// Registry of all shards known to this routing process
pub struct ShardRegistry {
    factory: Arc<dyn ShardFactory>,
    init_config_connection_string: ConnectionString,
    config: RegistryConfig,
    cache: VersionedCache<TopologySnapshot, TopologyVersion>,
    /// The config-server shard, kept outside the catalog-backed cache so it
    /// resolves before the first fetch and never shows up as removed.
    config_data: RwLock<Option<TopologySnapshot>>,
    latest_connection_strings: LatestConnectionStrings,
    is_up: Arc<AtomicBool>,
    initialized: AtomicBool,
    reload_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShardRegistry {
    /// Create a new registry
    ///
    /// `config_server_connection_string` reaches the config servers backing
    /// the catalog; `removal_hooks` run once per shard that disappears from
    /// the topology.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        factory: Arc<dyn ShardFactory>,
        config_server_connection_string: ConnectionString,
        removal_hooks: Vec<ShardRemovalHook>,
        config: RegistryConfig,
    ) -> Self {
        let latest_connection_strings: LatestConnectionStrings =
            Arc::new(RwLock::new(HashMap::new()));
        let is_up = Arc::new(AtomicBool::new(false));
        let fetcher = Arc::new(TopologyFetcher {
            catalog,
            factory: Arc::clone(&factory),
            latest_connection_strings: Arc::clone(&latest_connection_strings),
            removal_hooks,
            is_up: Arc::clone(&is_up),
        });

        Self {
            factory,
            init_config_connection_string: config_server_connection_string,
            config,
            cache: VersionedCache::new(fetcher),
            config_data: RwLock::new(None),
            latest_connection_strings,
            is_up,
            initialized: AtomicBool::new(false),
            reload_task: Mutex::new(None),
        }
    }

    /// Initialize the registry with the config shard
    ///
    /// Must be called exactly once, before any lookup.
    pub fn init(&self) -> Result<()> {
        assert!(
            !self.initialized.swap(true, Ordering::SeqCst),
            "ShardRegistry::init may only be called once"
        );
        let config_shard = self.factory.make_shard(
            ShardId::config_server(),
            self.init_config_connection_string.clone(),
        )?;
        *self.config_data.write() = Some(TopologySnapshot::with_config_shard_only(config_shard));
        // No topology time is known yet; force the first lookup to fetch.
        self.cache.invalidate();
        info!(config = %self.init_config_connection_string, "shard registry initialized");
        Ok(())
    }

    /// Whether a catalog fetch has ever succeeded
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.is_up.load(Ordering::Acquire)
    }

    /// Get the shard with the given id, refreshing the topology if needed
    ///
    /// `id` may also be a replica-set name or a `host:port` of any node in
    /// the shard. An unresolved id forces one refresh and retries before
    /// returning [`Error::ShardNotFound`].
    pub async fn get_shard(&self, id: &ShardId) -> Result<Arc<Shard>> {
        let (data, _) = self.cache.acquire_latest().await?;
        if let Some(shard) = self.resolve(Some(&data.value), id) {
            return Ok(shard);
        }

        self.cache.invalidate();
        let (data, _) = self.cache.acquire_latest().await?;
        self.resolve(Some(&data.value), id)
            .ok_or_else(|| Error::ShardNotFound(id.clone()))
    }

    /// Get the shard with the given id from the cached view only
    ///
    /// Never performs network traffic; a shard added since the last refresh
    /// may not be found.
    #[must_use]
    pub fn get_shard_no_reload(&self, id: &ShardId) -> Option<Arc<Shard>> {
        let cached = self.cache.get_cached();
        self.resolve(cached.as_ref().map(|c| &*c.value), id)
    }

    /// Get the shard containing the node at `host`, from the cached view only
    #[must_use]
    pub fn get_shard_for_host_no_reload(&self, host: &HostAndPort) -> Option<Arc<Shard>> {
        if let Some(config) = self.config_data.read().as_ref() {
            if let Some(shard) = config.find_by_host(host) {
                return Some(shard);
            }
        }
        self.cache
            .get_cached()
            .and_then(|cached| cached.value.find_by_host(host))
    }

    /// All known shard ids, refreshing the topology if needed
    pub async fn get_all_shard_ids(&self) -> Result<Vec<ShardId>> {
        let (data, _) = self.cache.acquire_latest().await?;
        Ok(data.value.all_ids())
    }

    /// All known shard ids from the cached view only
    #[must_use]
    pub fn get_all_shard_ids_no_reload(&self) -> Vec<ShardId> {
        self.cache
            .get_cached()
            .map(|cached| cached.value.all_ids())
            .unwrap_or_default()
    }

    /// Number of shards, refreshing the topology if needed
    pub async fn get_num_shards(&self) -> Result<usize> {
        let (data, _) = self.cache.acquire_latest().await?;
        Ok(data.value.shard_count())
    }

    /// Number of shards in the cached view only
    #[must_use]
    pub fn get_num_shards_no_reload(&self) -> usize {
        self.cache
            .get_cached()
            .map(|cached| cached.value.shard_count())
            .unwrap_or(0)
    }

    /// The config-server shard
    #[must_use]
    pub fn get_config_shard(&self) -> Option<Arc<Shard>> {
        self.config_data
            .read()
            .as_ref()
            .and_then(|data| data.find_by_id(&ShardId::config_server()))
    }

    /// The current connection string for the config servers
    #[must_use]
    pub fn get_config_server_connection_string(&self) -> Option<ConnectionString> {
        self.get_config_shard()
            .map(|shard| shard.connection_string().clone())
    }

    /// Record a replica-set membership change
    ///
    /// Called by the replica-set monitor, concurrently with everything else.
    /// The connection string is stashed under its replica-set name and the
    /// next refresh folds it in; a notification racing an in-flight fetch is
    /// folded into that fetch's merge or the immediately following one,
    /// never lost.
    pub fn update_membership(&self, connection_string: &ConnectionString) {
        let Some(set_name) = connection_string.set_name() else {
            warn!(%connection_string, "ignoring membership update without a replica-set name");
            return;
        };

        // The config shard is not part of the catalog-backed topology;
        // refresh its view directly.
        {
            let mut config_data = self.config_data.write();
            let updated = config_data.as_ref().and_then(|data| {
                match data.with_updated_connection_string(connection_string, &*self.factory) {
                    Ok((next, Some(_))) => Some(next),
                    Ok((_, None)) => None,
                    Err(error) => {
                        warn!(%error, "failed to apply membership update to config shard");
                        None
                    }
                }
            });
            if let Some(next) = updated {
                *config_data = Some(next);
            }
        }

        debug!(set_name, %connection_string, "stashed membership update");
        self.latest_connection_strings
            .write()
            .insert(set_name.to_string(), connection_string.clone());
        self.cache.bump_membership();
    }

    /// Force a topology refresh
    ///
    /// Returns `true` if this call performed the fetch, `false` if it only
    /// observed a concurrent one's result. A `false` return does not
    /// guarantee the caller's own staleness window was closed; callers that
    /// need that guarantee call `reload` once more.
    pub async fn reload(&self) -> Result<bool> {
        self.cache.invalidate();
        let (_, outcome) = self.cache.acquire_latest().await?;
        Ok(outcome == AcquireOutcome::Fetched)
    }

    /// Drop the cached topology so the next access unconditionally fetches
    pub fn clear_entries(&self) {
        self.cache.clear();
        self.cache.invalidate();
        info!("cleared shard registry entries");
    }

    /// Start the background task that reloads the topology periodically
    ///
    /// No-op if the task is already running.
    pub fn start_periodic_reload(&self) {
        let mut task = self.reload_task.lock();
        if task.is_some() {
            return;
        }
        let cache = self.cache.clone();
        let interval = self.config.reload_interval();
        info!(?interval, "starting periodic topology reload");
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cache.invalidate();
                match cache.acquire_latest().await {
                    Ok(_) => debug!("periodic topology reload completed"),
                    Err(error) => warn!(%error, "periodic topology reload failed"),
                }
            }
        }));
    }

    /// Stop the periodic reload task
    ///
    /// Idempotent and safe to call without a prior start.
    pub fn shutdown(&self) {
        if let Some(task) = self.reload_task.lock().take() {
            task.abort();
            info!("stopped periodic topology reload");
        }
    }

    /// Diagnostic dump of the registry state
    #[must_use]
    pub fn report(&self) -> RegistryReport {
        let cached = self.cache.get_cached();
        RegistryReport {
            is_up: self.is_up(),
            version: cached.as_ref().map(|cached| cached.time),
            config_topology: self
                .config_data
                .read()
                .as_ref()
                .map(TopologySnapshot::to_report),
            topology: cached.as_ref().map(|cached| cached.value.to_report()),
        }
    }

    /// Resolve `id` as a shard id, then a replica-set name, then a host
    fn resolve(&self, data: Option<&TopologySnapshot>, id: &ShardId) -> Option<Arc<Shard>> {
        if let Some(config) = self.config_data.read().as_ref() {
            if let Some(shard) = Self::resolve_in(config, id) {
                return Some(shard);
            }
        }
        data.and_then(|data| Self::resolve_in(data, id))
    }

    fn resolve_in(data: &TopologySnapshot, id: &ShardId) -> Option<Arc<Shard>> {
        if let Some(shard) = data.find_by_id(id) {
            return Some(shard);
        }
        if let Some(shard) = data.find_by_replica_set_name(id.as_str()) {
            return Some(shard);
        }
        if let Ok(host) = id.as_str().parse::<HostAndPort>() {
            if let Some(shard) = data.find_by_host(&host) {
                return Some(shard);
            }
        }
        None
    }
}

impl Drop for ShardRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Diagnostic view of the registry
#[derive(Debug, Serialize)]
pub struct RegistryReport {
    /// Whether a catalog fetch has ever succeeded
    pub is_up: bool,
    /// Version of the cached topology, if any
    pub version: Option<TopologyVersion>,
    /// Indices of the config-shard view
    pub config_topology: Option<SnapshotReport>,
    /// Indices of the cached catalog-backed topology
    pub topology: Option<SnapshotReport>,
}
