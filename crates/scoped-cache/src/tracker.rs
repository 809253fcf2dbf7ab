//! Access tracking and capacity based eviction.
//!
//! Every access pushes its key onto a lock-free queue and then tries to claim the `maintaining`
//! flag. Whoever wins the claim drains the queue into the recency index and evicts least
//! recently used entries until the cache is back within its capacity. Everybody else returns
//! right away: their access is already queued and will be picked up by the current or the next
//! maintenance pass.
//!
//! Entries leaving the map other than by eviction (invalidation, expiry, cancelled lookups) queue
//! a removal the same way, so the recency index only ever knows about keys that are in the map.
//!
//! Finalization of evicted values happens after the claim is released.

use std::hash::Hash;
use std::sync::TryLockError;
use std::sync::atomic::Ordering;

use crate::cache::CacheInner;
use crate::state::{Access, MapValue, clean_map_value};

impl<K, V, E> CacheInner<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Records an access to `key` and runs a maintenance pass if nobody else is.
    pub(crate) fn track_access(&self, key: K) {
        self.enqueue_access(key);
        self.maintain();
    }

    /// Records an access to `key`, leaving it to the next maintenance pass.
    pub(crate) fn enqueue_access(&self, key: K) {
        // we hold the receiving end ourselves, so this can't fail
        let _ = self.state.accesses.send(Access::Touch(key));
    }

    /// Records that the entry for `key` was removed from the map.
    pub(crate) fn track_removal(&self, key: K) {
        let _ = self.state.accesses.send(Access::Remove(key));
        self.maintain();
    }

    fn maintain(&self) {
        loop {
            if self
                .state
                .maintaining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            let evicted = self.maintenance_pass();

            self.state.maintaining.store(false, Ordering::Release);

            if !evicted.is_empty() {
                tracing::trace!(cache = %self.name, evicted = evicted.len(), "Evicted entries");
                metric!(counter("caches.eviction") += evicted.len() as i64, "cache" => &self.name);
            }
            for value in evicted {
                clean_map_value(value);
            }

            // Accesses pushed after we stopped draining, but before the claim was released, would
            // otherwise wait for the next access to be incorporated.
            if self.state.pending_accesses.is_empty() {
                return;
            }
        }
    }

    /// Drains pending accesses and evicts down to capacity.
    ///
    /// Must only be called while holding the `maintaining` claim.
    fn maintenance_pass(&self) -> Vec<MapValue<V, E>> {
        let mut recency = match self.state.recency.try_lock() {
            Ok(recency) => recency,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // nobody else locks it without holding the claim
            Err(TryLockError::WouldBlock) => return Vec::new(),
        };

        for access in self.state.pending_accesses.try_iter() {
            match access {
                Access::Touch(key) => recency.touch(key),
                // The key may have been put back since, in which case its touch is either
                // already incorporated or still queued.
                Access::Remove(key) => {
                    if !self.state.entries.contains_key(&key) {
                        recency.remove(&key);
                    }
                }
            }
        }

        let mut evicted = Vec::new();
        while self.state.entries.len() > self.capacity {
            let Some(key) = recency.pop_lru() else {
                break;
            };
            // keys of already invalidated entries are dropped on the way
            if let Some((_, value)) = self.state.entries.remove(&key) {
                evicted.push(value);
            }
        }

        metric!(gauge("caches.size") = self.state.entries.len() as u64, "cache" => &self.name);

        evicted
    }
}
