use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, TokioClock};
use crate::config::CacheConfig;
use crate::lookup::Lookup;
use crate::scope::Scope;
use crate::state::CacheState;

use super::{CacheInner, ScopedCache, TimeToLive};

/// Builds a [`ScopedCache`].
///
/// By default, a cache is named `"default"`, holds up to 1024 entries, and keeps them until they
/// are evicted or invalidated.
pub struct CacheBuilder<K, V, E> {
    name: String,
    capacity: usize,
    time_to_live: TimeToLive<V, E>,
    failure_time_to_live: Option<Duration>,
    clock: Arc<dyn Clock>,
    _key: PhantomData<fn(K)>,
}

impl<K, V, E> fmt::Debug for CacheBuilder<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("failure_time_to_live", &self.failure_time_to_live)
            .finish_non_exhaustive()
    }
}

impl<K, V, E> CacheBuilder<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let defaults = CacheConfig::default();
        Self {
            name: defaults.name,
            capacity: defaults.capacity,
            time_to_live: Box::new(|_: &Result<V, E>| Duration::MAX),
            failure_time_to_live: None,
            clock: Arc::new(TokioClock),
            _key: PhantomData,
        }
    }

    /// The name used to tag metrics and log messages.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The maximum number of entries.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Expires every entry `time_to_live` after its lookup finished.
    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Box::new(move |_: &Result<V, E>| time_to_live);
        self
    }

    /// Expires entries after a duration computed from their lookup result.
    pub fn time_to_live_with<F>(mut self, time_to_live: F) -> Self
    where
        F: Fn(&Result<V, E>) -> Duration + Send + Sync + 'static,
    {
        self.time_to_live = Box::new(time_to_live);
        self
    }

    /// Expires failed lookups after `failure_time_to_live`, regardless of the time-to-live of
    /// successful ones.
    pub fn failure_time_to_live(mut self, failure_time_to_live: Duration) -> Self {
        self.failure_time_to_live = Some(failure_time_to_live);
        self
    }

    /// The clock expiration decisions are based on.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Takes name, capacity and time-to-live settings from `config`.
    pub fn config(mut self, config: &CacheConfig) -> Self {
        self.failure_time_to_live = None;
        let expiration = config.clone();
        self.name(config.name.clone())
            .capacity(config.capacity)
            .time_to_live_with(move |result: &Result<V, E>| {
                expiration
                    .time_to_live_for(result)
                    .unwrap_or(Duration::MAX)
            })
    }

    /// Builds a cache computing values with the given function.
    pub fn build<F, Fut>(self, lookup: F) -> ScopedCache<K, V, E>
    where
        F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.build_with(lookup)
    }

    /// Builds a cache computing values with the given [`Lookup`].
    pub fn build_with<L: Lookup<K, V, E>>(self, lookup: L) -> ScopedCache<K, V, E> {
        let time_to_live: TimeToLive<V, E> = match self.failure_time_to_live {
            None => self.time_to_live,
            Some(failure_time_to_live) => {
                let time_to_live = self.time_to_live;
                Box::new(move |result: &Result<V, E>| match result {
                    Ok(_) => time_to_live(result),
                    Err(_) => failure_time_to_live,
                })
            }
        };

        tracing::debug!(cache = %self.name, capacity = self.capacity, "Creating cache");

        ScopedCache::from_inner(CacheInner {
            name: self.name,
            capacity: self.capacity,
            time_to_live,
            lookup: Box::new(lookup),
            clock: self.clock,
            state: CacheState::new(),
        })
    }
}
