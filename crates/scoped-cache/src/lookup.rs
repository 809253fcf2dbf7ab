//! Lookup memoization.
//!
//! Each placeholder put into the cache carries a [`Memoized`] computation of its value. The
//! computation is shared between all callers interested in that key, and runs at most once.
//!
//! The memoized future itself is lazy: nothing happens until it is first polled. At that point the
//! actual computation is spawned onto the tokio runtime, so it keeps going even if every caller
//! waiting for it goes away. Once the lookup finishes, the computation installs its [`Complete`]
//! value into the map, replacing its own placeholder.
//!
//! Should the spawned computation end without a value (the lookup panicked, or the runtime is
//! shutting down), a drop token removes the placeholder again, and all waiters observe
//! [`CacheError::Cancelled`](crate::CacheError::Cancelled) instead of hanging forever.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cache::CacheInner;
use crate::error::Cancelled;
use crate::lease::Resource;
use crate::scope::Scope;
use crate::state::{Complete, MapValue, Memoized, clean_map_value};
use crate::utils::futures::CallOnDrop;

/// Computes the value for a key.
///
/// The lookup runs inside a fresh [`Scope`]. Finalizers registered on that scope run once the
/// computed value is not used anymore, or right away if the lookup fails.
///
/// This is implemented for all functions and closures of the form
/// `Fn(K, Scope) -> impl Future<Output = Result<V, E>>`.
pub trait Lookup<K, V, E>: Send + Sync + 'static {
    /// Computes the value for `key`.
    fn lookup(&self, key: K, scope: Scope) -> BoxFuture<'static, Result<V, E>>;
}

impl<K, V, E, F, Fut> Lookup<K, V, E> for F
where
    F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    fn lookup(&self, key: K, scope: Scope) -> BoxFuture<'static, Result<V, E>> {
        Box::pin(self(key, scope))
    }
}

impl<K, V, E> CacheInner<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Builds, but does not start, the computation for the placeholder with id `placeholder`.
    pub(crate) fn lookup_value_of(self: &Arc<Self>, key: K, placeholder: u64) -> Memoized<V, E> {
        // Placeholders live inside the map, so holding a strong reference here would keep the
        // cache alive forever.
        let cache = Arc::downgrade(self);

        let computation = async move {
            let cache = cache.upgrade().ok_or(Cancelled)?;
            let name = cache.name.clone();

            tokio::spawn(cache.compute(key, placeholder))
                .await
                .map_err(|err| {
                    tracing::warn!(
                        cache = %name,
                        error = &err as &dyn std::error::Error,
                        "Cache computation was cancelled",
                    );
                    metric!(counter("caches.computation.cancelled") += 1, "cache" => &name);
                    Cancelled
                })
        };

        computation.boxed().shared()
    }

    /// Runs the lookup and installs its result.
    async fn compute(self: Arc<Self>, key: K, placeholder: u64) -> Arc<Complete<V, E>> {
        // Once the result is installed, the placeholder is gone and this does nothing. In case we
        // never get there, this makes sure no caller waits on an orphaned placeholder.
        let _placeholder_token = {
            let cache = Arc::clone(&self);
            let key = key.clone();
            CallOnDrop::new(move || cache.remove_placeholder(&key, placeholder))
        };

        tracing::debug!(cache = %self.name, "Computing cache value");
        metric!(counter("caches.computation") += 1, "cache" => &self.name);
        let started = std::time::Instant::now();

        let scope = Scope::new();
        let result = self.lookup.lookup(key.clone(), scope.clone()).await;

        metric!(timer("caches.computation.duration") = started.elapsed(), "cache" => &self.name);

        let created_at = self.clock.now();
        let expires_at = created_at.checked_add((self.time_to_live)(&result));

        let result = match result {
            Ok(value) => Ok(Arc::new(Resource::new(value, scope))),
            Err(err) => {
                tracing::debug!(cache = %self.name, "Cache lookup failed");
                metric!(counter("caches.computation.failed") += 1, "cache" => &self.name);
                // a failure owns nothing
                scope.close();
                Err(err)
            }
        };

        let complete = Arc::new(Complete {
            id: self.state.next_id(),
            result,
            created_at,
            expires_at,
        });
        self.install(key, placeholder, &complete);

        complete
    }

    /// Swaps the placeholder for the finished value.
    ///
    /// If the placeholder was removed in the meantime, the value is installed anyway. If it was
    /// replaced by a newer value, that one wins, and the finished value is only handed to the
    /// callers that were already waiting for it.
    fn install(&self, key: K, placeholder: u64, complete: &Arc<Complete<V, E>>) {
        let value = MapValue::Complete(Arc::clone(complete));

        let (installed, previous) = match self.state.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().id() == placeholder => {
                (true, Some(entry.insert(value)))
            }
            Entry::Occupied(_) => (false, None),
            Entry::Vacant(entry) => {
                entry.insert(value);
                (true, None)
            }
        };

        match (installed, previous) {
            (true, Some(previous)) => clean_map_value(previous),
            (true, None) => {
                // The placeholder was invalidated or evicted while computing, so the key has to be
                // known to the recency index again. Evicting right away would finalize the value
                // before any waiter got to lease it.
                self.enqueue_access(key);
            }
            (false, _) => {
                tracing::trace!(cache = %self.name, "Discarding superseded cache value");
                complete.release_slot();
            }
        }
    }

    /// Removes the placeholder with id `placeholder`, if it is still in place.
    fn remove_placeholder(&self, key: &K, placeholder: u64) {
        if let Some(value) = self.state.remove_if_current(key, placeholder) {
            tracing::warn!(cache = %self.name, "Removing placeholder of cancelled computation");
            clean_map_value(value);
            self.track_removal(key.clone());
        }
    }
}
