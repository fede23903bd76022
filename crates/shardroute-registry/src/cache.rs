//! Versioned read-through cache with single-flight refresh
//!
//! [`VersionedCache`] holds exactly one published `(value, version)` pair —
//! there is one topology per process — plus at most one in-flight fetch.
//! Readers whose freshness requirement is already met return immediately;
//! everyone else coalesces onto the single in-flight fetch and is released
//! together with the same result when it completes.
//!
//! Lock discipline: one mutex guards the published pair, the wanted version,
//! and the in-flight slot. It is only ever held to swap state, never across
//! the fetch itself, which runs in a spawned task and always completes even
//! if every caller that wanted it has gone away.

use crate::version::CausalVersion;
use async_trait::async_trait;
use parking_lot::Mutex;
use shardroute_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Produces a fresh value when the cache is stale
///
/// `wanted` is the version the cache wants covered; the returned version
/// must satisfy it, and must account for no more than the fetcher actually
/// observed while building the value.
#[async_trait]
pub trait Fetcher<V, T>: Send + Sync {
    async fn fetch(&self, previous: Option<Arc<V>>, wanted: T) -> Result<(Arc<V>, T)>;
}

/// A published value paired with its version
#[derive(Debug)]
pub struct VersionedValue<V, T> {
    /// The cached value
    pub value: Arc<V>,
    /// The version the value was published at
    pub time: T,
}

impl<V, T: Clone> Clone for VersionedValue<V, T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            time: self.time.clone(),
        }
    }
}

/// How an `acquire` call was satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The published value was already fresh enough
    Hit,
    /// This call started the fetch that produced the result
    Fetched,
    /// This call waited on a fetch another caller started
    Joined,
}

type FetchResult<V, T> = std::result::Result<VersionedValue<V, T>, Error>;
type FlightReceiver<V, T> = watch::Receiver<Option<FetchResult<V, T>>>;

struct CacheState<V, T> {
    published: Option<VersionedValue<V, T>>,
    time_in_store: T,
    in_flight: Option<FlightReceiver<V, T>>,
}

struct CacheInner<V, T> {
    fetcher: Arc<dyn Fetcher<V, T>>,
    state: Mutex<CacheState<V, T>>,
}

/// Single-entry read-through cache keyed by causal version
///
/// Cloning produces another handle to the same cache: clones share the
/// published value, the wanted version, and the in-flight fetch.
pub struct VersionedCache<V, T: CausalVersion> {
    inner: Arc<CacheInner<V, T>>,
}

impl<V, T: CausalVersion> Clone for VersionedCache<V, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, T> VersionedCache<V, T>
where
    V: Send + Sync + 'static,
    T: CausalVersion,
{
    /// Create an empty cache around the given fetcher
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher<V, T>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                state: Mutex::new(CacheState {
                    published: None,
                    time_in_store: T::default(),
                    in_flight: None,
                }),
            }),
        }
    }

    /// Get a value at or above `min`, fetching if the published one is stale
    ///
    /// Non-blocking when the published version already satisfies `min`;
    /// otherwise joins or starts the single in-flight fetch. A fetch failure
    /// is reported to every caller waiting on it, and the previously
    /// published value remains served to non-blocking readers.
    pub async fn acquire(&self, min: &T) -> Result<(VersionedValue<V, T>, AcquireOutcome)> {
        self.advance_time(min);
        self.acquire_inner(Some(min)).await
    }

    /// Get a value at or above every version this cache has been told about
    pub async fn acquire_latest(&self) -> Result<(VersionedValue<V, T>, AcquireOutcome)> {
        self.acquire_inner(None).await
    }

    async fn acquire_inner(&self, min: Option<&T>) -> Result<(VersionedValue<V, T>, AcquireOutcome)> {
        let mut initiated = false;
        let mut waited = false;
        loop {
            let mut rx = {
                let mut state = self.inner.state.lock();
                let wanted = match min {
                    Some(min) => min.clone(),
                    None => state.time_in_store.clone(),
                };

                if let Some(published) = &state.published {
                    if published.time.satisfies(&wanted) {
                        let outcome = if initiated {
                            AcquireOutcome::Fetched
                        } else if waited {
                            AcquireOutcome::Joined
                        } else {
                            AcquireOutcome::Hit
                        };
                        return Ok((published.clone(), outcome));
                    }
                }

                match &state.in_flight {
                    Some(flight) => flight.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight = Some(rx.clone());
                        initiated = true;
                        let previous = state.published.as_ref().map(|p| Arc::clone(&p.value));
                        let flight_wanted = state.time_in_store.clone();
                        Self::spawn_fetch(Arc::clone(&self.inner), tx, previous, flight_wanted);
                        rx
                    }
                }
            };

            waited = true;
            let outcome = match rx.wait_for(|result| result.is_some()).await {
                Ok(guard) => guard.clone(),
                Err(_) => {
                    // The fetch task died without reporting (runtime
                    // teardown). Clear the dead flight so the next caller
                    // can start a fresh one.
                    let mut state = self.inner.state.lock();
                    let dead = state
                        .in_flight
                        .as_ref()
                        .is_some_and(|flight| flight.has_changed().is_err());
                    if dead {
                        state.in_flight = None;
                    }
                    continue;
                }
            };
            let Some(outcome) = outcome else { continue };
            if let Err(error) = outcome {
                return Err(error);
            }
            // Success: loop and return through the published pair, which
            // the fetch installed before signalling.
        }
    }

    fn spawn_fetch(
        inner: Arc<CacheInner<V, T>>,
        tx: watch::Sender<Option<FetchResult<V, T>>>,
        previous: Option<Arc<V>>,
        wanted: T,
    ) {
        tokio::spawn(async move {
            let result = inner.fetcher.fetch(previous, wanted.clone()).await;
            let outcome = {
                let mut state = inner.state.lock();
                state.in_flight = None;
                match result {
                    Ok((value, time)) => {
                        debug!(?time, "publishing refreshed value");
                        state.time_in_store = state.time_in_store.component_max(&time);
                        let published = VersionedValue { value, time };
                        state.published = Some(published.clone());
                        Ok(published)
                    }
                    Err(error) => {
                        warn!(%error, ?wanted, "fetch failed; keeping previous value");
                        Err(error)
                    }
                }
            };
            let _ = tx.send(Some(outcome));
        });
    }

    /// The latest published value, never triggering a fetch
    #[must_use]
    pub fn get_cached(&self) -> Option<VersionedValue<V, T>> {
        self.inner.state.lock().published.clone()
    }

    /// The most recent version this cache has been asked to cover
    #[must_use]
    pub fn time_in_store(&self) -> T {
        self.inner.state.lock().time_in_store.clone()
    }

    /// Record that out-of-band membership state advanced
    pub fn bump_membership(&self) {
        let mut state = self.inner.state.lock();
        state.time_in_store = state.time_in_store.bump_membership();
    }

    /// Force the next `acquire` to treat the published version as stale
    ///
    /// Discards no data; guarantees the next completed fetch is genuinely
    /// new work.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.time_in_store = state.time_in_store.bump_force();
    }

    /// Raise the wanted version to at least `time`
    pub fn advance_time(&self, time: &T) {
        let mut state = self.inner.state.lock();
        state.time_in_store = state.time_in_store.component_max(time);
    }

    /// Drop the published value so the next acquire unconditionally fetches
    pub fn clear(&self) {
        self.inner.state.lock().published = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::TopologyVersion;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fetcher returning a fresh counter value, optionally gated so tests
    /// can hold a fetch in flight.
    struct CountingFetcher {
        calls: AtomicU64,
        topology_time: AtomicU64,
        gate: watch::Receiver<bool>,
        fail: AtomicU64,
    }

    impl CountingFetcher {
        fn open() -> (Arc<Self>, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(true);
            (Self::with_gate(rx), tx)
        }

        fn gated() -> (Arc<Self>, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(false);
            (Self::with_gate(rx), tx)
        }

        fn with_gate(gate: watch::Receiver<bool>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                topology_time: AtomicU64::new(0),
                gate,
                fail: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn new_cache(fetcher: Arc<CountingFetcher>) -> VersionedCache<u64, TopologyVersion> {
        VersionedCache::new(fetcher)
    }

    #[async_trait]
    impl Fetcher<u64, TopologyVersion> for CountingFetcher {
        async fn fetch(
            &self,
            _previous: Option<Arc<u64>>,
            wanted: TopologyVersion,
        ) -> Result<(Arc<u64>, TopologyVersion)> {
            self.gate.clone().wait_for(|open| *open).await.ok();
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) > 0 {
                self.fail.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::catalog_fetch("authority unreachable"));
            }
            let time = TopologyVersion::new(
                self.topology_time.fetch_add(1, Ordering::SeqCst) + 1,
                wanted.membership_increment(),
                wanted.force_reload_increment(),
            );
            Ok((Arc::new(call), time))
        }
    }

    #[tokio::test]
    async fn test_get_cached_never_fetches() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        assert!(cache.get_cached().is_none());
        cache.invalidate();
        assert!(cache.get_cached().is_none());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_acquire_fetches_once_then_hits() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        let (first, outcome) = cache.acquire_latest().await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert_eq!(*first.value, 1);

        let (second, outcome) = cache.acquire_latest().await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Hit);
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_work() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        cache.acquire_latest().await.unwrap();
        cache.invalidate();
        let (value, outcome) = cache.acquire_latest().await.unwrap();

        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert_eq!(*value.value, 2);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_drops_published_value() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        cache.acquire_latest().await.unwrap();
        cache.clear();
        assert!(cache.get_cached().is_none());

        let (_, outcome) = cache.acquire_latest().await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_fetch() {
        let (fetcher, gate) = CountingFetcher::gated();
        let cache = Arc::new(new_cache(Arc::clone(&fetcher)));
        cache.invalidate();
        let min = cache.time_in_store();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.acquire(&min).await.unwrap() },
            ));
        }
        // Let every caller reach the in-flight fetch before releasing it.
        tokio::task::yield_now().await;
        gate.send(true).unwrap();

        let mut fetched = 0;
        let mut joined = 0;
        let mut values = Vec::new();
        for handle in handles {
            let (value, outcome) = handle.await.unwrap();
            assert!(value.time.satisfies(&min));
            match outcome {
                AcquireOutcome::Fetched => fetched += 1,
                AcquireOutcome::Joined => joined += 1,
                AcquireOutcome::Hit => {}
            }
            values.push(value.value);
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetched, 1);
        assert!(joined >= 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_fetch_error_reaches_waiters_and_keeps_published() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        let (published, _) = cache.acquire_latest().await.unwrap();

        fetcher.fail.store(1, Ordering::SeqCst);
        cache.invalidate();
        let err = cache.acquire_latest().await.unwrap_err();
        assert!(err.is_retryable());

        // The previous value is still served to non-blocking readers.
        let cached = cache.get_cached().unwrap();
        assert!(Arc::ptr_eq(&published.value, &cached.value));

        // And the next acquire retries and succeeds.
        let (value, outcome) = cache.acquire_latest().await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert_eq!(*value.value, 3);
    }

    #[tokio::test]
    async fn test_membership_bump_makes_published_stale() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        cache.acquire_latest().await.unwrap();
        cache.bump_membership();

        let (value, outcome) = cache.acquire_latest().await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert!(value.time.satisfies(&cache.time_in_store()));
    }

    #[tokio::test]
    async fn test_acquire_with_future_min_fetches() {
        let (fetcher, _gate) = CountingFetcher::open();
        let cache = new_cache(Arc::clone(&fetcher));

        cache.acquire_latest().await.unwrap();
        let ahead = cache.time_in_store().bump_force();
        let (value, outcome) = cache.acquire(&ahead).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::Fetched);
        assert!(value.time.satisfies(&ahead));
    }
}
