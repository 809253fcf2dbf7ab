use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::CachePadded;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::Cancelled;
use crate::lease::{Lease, Resource, lease};
use crate::recency::RecencyList;

/// A memoized computation of the next [`Complete`] value of some key.
///
/// All clones observe the same outcome.
pub(crate) type Memoized<V, E> = Shared<BoxFuture<'static, Result<Arc<Complete<V, E>>, Cancelled>>>;

/// The finished result of a lookup.
pub(crate) struct Complete<V, E> {
    pub id: u64,
    /// A failure has no owners and no finalizers.
    pub result: Result<Arc<Resource<V>>, E>,
    pub created_at: Instant,
    /// `None` never expires.
    pub expires_at: Option<Instant>,
}

impl<V, E: Clone> Complete<V, E> {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Leases the computed value, or replays the failure.
    ///
    /// Returns `Ok(None)` if the value was finalized before it could be leased.
    pub fn lease(&self) -> Result<Option<Lease<V>>, E> {
        match &self.result {
            Ok(resource) => Ok(lease(resource)),
            Err(err) => Err(err.clone()),
        }
    }
}

impl<V, E> Complete<V, E> {
    /// Releases the ownership held by the cache slot this value was stored in.
    pub fn release_slot(&self) {
        if let Ok(resource) = &self.result {
            resource.release();
        }
    }
}

/// The value stored for a key.
pub(crate) enum MapValue<V, E> {
    /// A computation is in flight, and there is no previous value.
    Pending { id: u64, lookup: Memoized<V, E> },
    /// A finished computation.
    Complete(Arc<Complete<V, E>>),
    /// A computation is in flight, while the previous value is still being served.
    Refreshing {
        id: u64,
        lookup: Memoized<V, E>,
        current: Arc<Complete<V, E>>,
    },
}

impl<V, E> MapValue<V, E> {
    /// The identity of this particular value.
    ///
    /// Every value put into the map gets a fresh id, so comparing ids tells whether a slot was
    /// replaced in the meantime.
    pub fn id(&self) -> u64 {
        match self {
            MapValue::Pending { id, .. } => *id,
            MapValue::Complete(complete) => complete.id,
            MapValue::Refreshing { id, .. } => *id,
        }
    }

    /// The value currently servable from this slot, if any.
    pub fn current(&self) -> Option<&Arc<Complete<V, E>>> {
        match self {
            MapValue::Pending { .. } => None,
            MapValue::Complete(complete) => Some(complete),
            MapValue::Refreshing { current, .. } => Some(current),
        }
    }
}

impl<V, E> Clone for MapValue<V, E> {
    fn clone(&self) -> Self {
        match self {
            MapValue::Pending { id, lookup } => MapValue::Pending {
                id: *id,
                lookup: lookup.clone(),
            },
            MapValue::Complete(complete) => MapValue::Complete(Arc::clone(complete)),
            MapValue::Refreshing {
                id,
                lookup,
                current,
            } => MapValue::Refreshing {
                id: *id,
                lookup: lookup.clone(),
                current: Arc::clone(current),
            },
        }
    }
}

/// Hit and miss counters, plus the current number of entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Statistics about a single cached value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryStats {
    /// When the lookup producing the value finished.
    pub created_at: Instant,
}

/// A change to the recency index, queued for the next maintenance pass.
pub(crate) enum Access<K> {
    /// The key was used.
    Touch(K),
    /// The entry for the key left the map other than by eviction.
    Remove(K),
}

/// All the mutable state of one cache.
pub(crate) struct CacheState<K, V, E> {
    pub entries: DashMap<K, MapValue<V, E>>,
    /// Only ever locked by the holder of the `maintaining` claim, using `try_lock`. The mutex is
    /// never contended and nobody blocks on it.
    pub recency: Mutex<RecencyList<K>>,
    pub accesses: Sender<Access<K>>,
    pub pending_accesses: Receiver<Access<K>>,
    pub maintaining: AtomicBool,
    pub hits: CachePadded<AtomicU64>,
    pub misses: CachePadded<AtomicU64>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Clone, V, E> CacheState<K, V, E> {
    pub fn new() -> Self {
        let (accesses, pending_accesses) = crossbeam_channel::unbounded();
        Self {
            entries: DashMap::new(),
            recency: Mutex::new(RecencyList::default()),
            accesses,
            pending_accesses,
            maintaining: AtomicBool::new(false),
            hits: Default::default(),
            misses: Default::default(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the value stored for `key`.
    ///
    /// This clones the value out so no shard lock is held by the caller.
    pub fn snapshot(&self, key: &K) -> Option<MapValue<V, E>> {
        self.entries.get(key).map(|value| value.clone())
    }

    /// Removes the value for `key`, but only if it is still the one with the given `id`.
    pub fn remove_if_current(&self, key: &K, id: u64) -> Option<MapValue<V, E>> {
        self.entries
            .remove_if(key, |_, value| value.id() == id)
            .map(|(_, value)| value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

/// Releases whatever the cache slot owned in a value that was removed from the map.
///
/// A [`MapValue::Pending`] owns nothing yet. A [`MapValue::Refreshing`] owns the value it was
/// still serving.
pub(crate) fn clean_map_value<V, E>(value: MapValue<V, E>) {
    match value {
        MapValue::Pending { .. } => {}
        MapValue::Complete(complete) => complete.release_slot(),
        MapValue::Refreshing { current, .. } => current.release_slot(),
    }
}
