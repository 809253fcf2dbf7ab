use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;

use crate::clock::Clock;
use crate::error::CacheError;
use crate::lease::Lease;
use crate::lookup::Lookup;
use crate::scope::Scope;
use crate::state::{CacheState, CacheStats, Complete, EntryStats, MapValue, Memoized, clean_map_value};

mod builder;

pub use builder::CacheBuilder;

/// Computes how long a lookup result stays valid.
pub(crate) type TimeToLive<V, E> = Box<dyn Fn(&Result<V, E>) -> Duration + Send + Sync>;

pub(crate) struct CacheInner<K: Eq + Hash, V, E> {
    /// Used as the `cache` tag on metrics and logs.
    pub name: String,
    pub capacity: usize,
    pub time_to_live: TimeToLive<V, E>,
    pub lookup: Box<dyn Lookup<K, V, E>>,
    pub clock: Arc<dyn Clock>,
    pub state: CacheState<K, V, E>,
}

/// What to do about an entry found in the map.
enum Resolution<V, E> {
    /// A finished value that can be served right away.
    Ready(Arc<Complete<V, E>>),
    /// A computation to wait for.
    Await(Memoized<V, E>),
    /// The entry was stale and has been dealt with, so the operation should start over.
    Retry,
}

impl<K, V, E> CacheInner<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn record_hit(&self, key: K) {
        self.state.record_hit();
        tracing::trace!(cache = %self.name, "Cache hit");
        metric!(counter("caches.memory.hit") += 1, "cache" => &self.name);
        self.track_access(key);
    }

    fn record_miss(&self, key: K) {
        self.state.record_miss();
        tracing::trace!(cache = %self.name, "Cache miss");
        metric!(counter("caches.memory.miss") += 1, "cache" => &self.name);
        self.track_access(key);
    }

    /// Finds the value for `key`, putting a new placeholder in place if there is none.
    fn begin_get(self: &Arc<Self>, key: &K) -> Resolution<V, E> {
        if let Some(value) = self.state.snapshot(key) {
            return self.resolve(key, value);
        }

        let id = self.state.next_id();
        let lookup = self.lookup_value_of(key.clone(), id);

        let existing = match self.state.entries.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(MapValue::Pending {
                    id,
                    lookup: lookup.clone(),
                });
                None
            }
        };

        match existing {
            // somebody else was faster
            Some(value) => self.resolve(key, value),
            None => {
                self.record_miss(key.clone());
                Resolution::Await(lookup)
            }
        }
    }

    /// Decides how to serve an existing entry, counting it as a hit.
    fn resolve(&self, key: &K, value: MapValue<V, E>) -> Resolution<V, E> {
        self.record_hit(key.clone());
        let now = self.clock.now();

        match value {
            MapValue::Pending { lookup, .. } => Resolution::Await(lookup),
            MapValue::Complete(complete) if complete.is_expired(now) => {
                self.remove_expired(key, &complete);
                Resolution::Retry
            }
            MapValue::Complete(complete) => Resolution::Ready(complete),
            MapValue::Refreshing {
                lookup, current, ..
            } => {
                if current.is_expired(now) {
                    Resolution::Await(lookup)
                } else {
                    Resolution::Ready(current)
                }
            }
        }
    }

    /// Puts a refreshing computation in place for `key`, or joins the one already running.
    fn begin_refresh(self: &Arc<Self>, key: &K) -> Resolution<V, E> {
        let id = self.state.next_id();
        let lookup = self.lookup_value_of(key.clone(), id);

        let existing = match self.state.entries.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(MapValue::Pending {
                    id,
                    lookup: lookup.clone(),
                });
                None
            }
        };

        let complete = match existing {
            None => {
                self.record_miss(key.clone());
                return Resolution::Await(lookup);
            }
            Some(MapValue::Pending { lookup, .. } | MapValue::Refreshing { lookup, .. }) => {
                return Resolution::Await(lookup);
            }
            Some(MapValue::Complete(complete)) => complete,
        };

        if complete.is_expired(self.clock.now()) {
            self.remove_expired(key, &complete);
            return Resolution::Retry;
        }

        // The slot keeps owning the current value while it is being refreshed.
        let swapped = match self.state.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().id() == complete.id => {
                entry.insert(MapValue::Refreshing {
                    id,
                    lookup: lookup.clone(),
                    current: complete,
                });
                true
            }
            _ => false,
        };

        if swapped {
            Resolution::Await(lookup)
        } else {
            Resolution::Retry
        }
    }

    fn remove_expired(&self, key: &K, complete: &Complete<V, E>) {
        if let Some(value) = self.state.remove_if_current(key, complete.id) {
            tracing::trace!(cache = %self.name, "Removing expired cache entry");
            clean_map_value(value);
            self.track_removal(key.clone());
        }
    }

    fn invalidate(&self, key: &K) {
        if let Some((_, value)) = self.state.entries.remove(key) {
            tracing::trace!(cache = %self.name, "Invalidating cache entry");
            metric!(counter("caches.invalidation") += 1, "cache" => &self.name);
            clean_map_value(value);
            self.track_removal(key.clone());
        }
    }
}

/// Turns a resolution into a lease.
///
/// `Ok(None)` means the operation has to start over: either the entry was stale, or the value was
/// finalized between being looked up and being leased.
async fn into_lease<V, E: Clone>(
    resolution: Resolution<V, E>,
) -> Result<Option<Lease<V>>, CacheError<E>> {
    let complete = match resolution {
        Resolution::Ready(complete) => complete,
        Resolution::Await(lookup) => lookup.await?,
        Resolution::Retry => return Ok(None),
    };
    complete.lease().map_err(CacheError::Lookup)
}

impl<K: Eq + Hash, V, E> Drop for CacheInner<K, V, E> {
    fn drop(&mut self) {
        // A cache going away releases everything it still holds.
        let entries = std::mem::take(&mut self.state.entries);
        for (_, value) in entries {
            clean_map_value(value);
        }
    }
}

/// A concurrent, self-populating cache.
///
/// Values are computed by a [`Lookup`] on first access. Concurrent accesses to a key whose value
/// is still being computed share that one computation. Values are handed out as [`Lease`]s, and
/// the finalizers a lookup registered on its [`Scope`] only run once a value was removed from the
/// cache *and* every lease on it was dropped.
///
/// Handles are cheap to clone. Dropping the last handle invalidates everything left in the cache.
pub struct ScopedCache<K: Eq + Hash, V, E> {
    inner: Arc<CacheInner<K, V, E>>,
}

impl<K: Eq + Hash, V, E> Clone for ScopedCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V, E> fmt::Debug for ScopedCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("entries", &self.inner.state.entries.len())
            .finish()
    }
}

impl<K, V, E> ScopedCache<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `capacity` entries, each valid for `time_to_live`.
    pub fn new<F, Fut>(capacity: usize, time_to_live: Duration, lookup: F) -> Self
    where
        F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::builder()
            .capacity(capacity)
            .time_to_live(time_to_live)
            .build(lookup)
    }

    /// Creates a cache whose entries are valid for as long as `time_to_live` says, based on the
    /// outcome of their lookup.
    pub fn new_with<F, Fut, T>(capacity: usize, lookup: F, time_to_live: T) -> Self
    where
        F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        T: Fn(&Result<V, E>) -> Duration + Send + Sync + 'static,
    {
        Self::builder()
            .capacity(capacity)
            .time_to_live_with(time_to_live)
            .build(lookup)
    }

    pub fn builder() -> CacheBuilder<K, V, E> {
        CacheBuilder::new()
    }

    pub(crate) fn from_inner(inner: CacheInner<K, V, E>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns a lease on the value for `key`, computing it if necessary.
    ///
    /// If the lookup fails, the failure is cached and returned to every caller until it expires.
    /// Dropping the returned future does not cancel the lookup.
    pub async fn get(&self, key: K) -> Result<Lease<V>, CacheError<E>> {
        metric!(counter("caches.access") += 1, "cache" => &self.inner.name);
        loop {
            let resolution = self.inner.begin_get(&key);
            if let Some(lease) = into_lease(resolution).await? {
                return Ok(lease);
            }
        }
    }

    /// Returns a lease on the value for `key`, without starting a new lookup.
    ///
    /// A lookup that is already running is waited for. If the entry turns out to have expired,
    /// this falls back to [`get`](Self::get).
    pub async fn get_option(&self, key: K) -> Result<Option<Lease<V>>, CacheError<E>> {
        let Some(value) = self.inner.state.snapshot(&key) else {
            return Ok(None);
        };
        metric!(counter("caches.access") += 1, "cache" => &self.inner.name);

        let resolution = self.inner.resolve(&key, value);
        match into_lease(resolution).await? {
            Some(lease) => Ok(Some(lease)),
            None => self.get(key).await.map(Some),
        }
    }

    /// Whether there is an entry for `key`, in any state.
    ///
    /// This does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.entries.contains_key(key)
    }

    /// Removes the entry for `key`.
    ///
    /// The value is finalized once all outstanding leases on it are dropped. A lookup that is
    /// still running keeps going, and is only observed by callers that were already waiting.
    pub fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }

    /// Removes all entries.
    ///
    /// Entries are invalidated one after the other. Finalizers are plain synchronous closures, so
    /// running them from parallel tasks would gain nothing.
    pub fn invalidate_all(&self) {
        let keys: Vec<K> = self
            .inner
            .state
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.inner.invalidate(&key);
        }
    }

    /// Recomputes the value for `key`, while the current value keeps being served.
    ///
    /// If a computation for `key` is already running, this waits for that one instead. The
    /// previous value is only replaced once the new one is ready.
    pub async fn refresh(&self, key: K) -> Result<(), CacheError<E>> {
        metric!(counter("caches.refresh") += 1, "cache" => &self.inner.name);
        loop {
            let resolution = self.inner.begin_refresh(&key);
            if into_lease(resolution).await?.is_some() {
                return Ok(());
            }
        }
    }

    /// The number of entries, including running and failed lookups.
    pub fn size(&self) -> usize {
        self.inner.state.entries.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.state.stats()
    }

    /// Statistics about the value currently served for `key`, if any.
    pub fn entry_stats(&self, key: &K) -> Option<EntryStats> {
        let value = self.inner.state.snapshot(key)?;
        let complete = value.current()?;
        Some(EntryStats {
            created_at: complete.created_at,
        })
    }
}
