use thiserror::Error;

/// The error returned by [`ScopedCache::get`](crate::ScopedCache::get) and friends.
///
/// A failed lookup is cached like a successful one, and replayed to every caller as
/// [`Lookup`](Self::Lookup) until it expires or is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError<E> {
    /// The lookup function failed with the contained error.
    #[error("lookup failed: {0}")]
    Lookup(E),
    /// The computation producing the value was cancelled before it completed.
    ///
    /// This happens when the lookup panics, or its task is torn down together with the runtime.
    /// Nothing is cached in this case, and the next access starts a fresh computation.
    #[error("lookup was cancelled")]
    Cancelled,
}

impl<E> CacheError<E> {
    /// Returns the lookup error, if this is not a cancellation.
    pub fn into_lookup_error(self) -> Option<E> {
        match self {
            CacheError::Lookup(err) => Some(err),
            CacheError::Cancelled => None,
        }
    }
}

/// Marker for a shared computation that ended without producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

impl<E> From<Cancelled> for CacheError<E> {
    fn from(_: Cancelled) -> Self {
        CacheError::Cancelled
    }
}
