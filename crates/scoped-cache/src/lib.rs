//! # Scoped, self-populating caches
//!
//! A [`ScopedCache`] computes its values on demand using a [`Lookup`], and hands them out as
//! reference counted [`Lease`]s. Values may own resources, like open files or connections, whose
//! release logic is registered as finalizers on the [`Scope`] the lookup runs in.
//!
//! ## Entry lifecycle
//!
//! Each key maps to one of three states:
//!
//! - *Pending*: a lookup is running, and there is no previous value. All callers interested in
//!   the key wait for that one lookup (request coalescing).
//! - *Complete*: the lookup finished, either with a value or with an error. Errors are cached and
//!   replayed just like values.
//! - *Refreshing*: a new lookup is running, while the previous value keeps being served
//!   (stale-while-revalidate). See [`ScopedCache::refresh`].
//!
//! A value is finalized once it is gone from the cache (invalidated, evicted, expired or replaced
//! by a refresh) *and* every lease on it was dropped. Not a moment earlier, and exactly once.
//!
//! ## Eviction
//!
//! Entries expire after a configurable time-to-live, which may depend on the lookup result.
//! Expired entries are removed lazily, by the next access to them.
//!
//! The number of entries is bounded by a capacity. Every access is queued, and whoever manages to
//! claim the maintenance flag drains that queue and evicts the least recently used entries. The
//! cache can transiently hold more entries than its capacity while such a pass is outstanding.
//!
//! ## Metrics
//!
//! The following metrics are collected, each tagged with a `cache` field holding the cache name:
//!
//! - `caches.access`: All accesses through `get` and `get_option`.
//! - `caches.memory.hit`: Accesses served by an existing entry.
//! - `caches.memory.miss`: Accesses that had to start a new lookup.
//! - `caches.computation`: Lookups being run.
//! - `caches.computation.duration`: How long lookups took.
//! - `caches.computation.failed`: Lookups that returned an error.
//! - `caches.computation.cancelled`: Lookups that ended without a result.
//! - `caches.eviction`: Entries evicted because the cache was over capacity.
//! - `caches.invalidation`: Entries explicitly invalidated.
//! - `caches.refresh`: Calls to `refresh`.
//! - `caches.size`: The number of entries after each maintenance pass.
//!
//! Metrics are only sent if a statsd client was configured using
//! [`metrics::configure_statsd`].

#[macro_use]
pub mod metrics;

mod cache;
mod clock;
pub mod config;
mod error;
mod lease;
pub mod logging;
mod lookup;
mod recency;
mod scope;
mod state;
mod tracker;
pub mod utils;

#[cfg(test)]
mod test;

pub use cache::{CacheBuilder, ScopedCache};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::CacheConfig;
pub use error::CacheError;
pub use lease::Lease;
pub use lookup::Lookup;
pub use scope::Scope;
pub use state::{CacheStats, EntryStats};
