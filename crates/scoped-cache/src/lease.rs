//! Reference counted ownership of computed values.
//!
//! A successfully computed value is wrapped in a [`Resource`] together with the [`Scope`] its
//! lookup ran in. The cache slot holding the value counts as one owner, and every [`Lease`]
//! handed out to a caller counts as another. The scope is closed, running the value's finalizers,
//! once the last owner lets go.
//!
//! Since the cache slot is an owner itself, a value is never finalized merely for being idle in
//! the cache. It has to be removed (invalidated, evicted, expired and replaced) *and* every
//! outstanding lease has to be dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::scope::Scope;

pub(crate) struct Resource<V> {
    value: V,
    owners: AtomicUsize,
    scope: Scope,
}

impl<V> Resource<V> {
    /// Wraps a freshly computed value, owned by the cache slot it is about to be stored in.
    pub fn new(value: V, scope: Scope) -> Self {
        Self {
            value,
            owners: AtomicUsize::new(1),
            scope,
        }
    }

    pub fn owners(&self) -> usize {
        self.owners.load(Ordering::Acquire)
    }

    /// Adds an owner, unless the resource has already been finalized.
    fn try_acquire(&self) -> bool {
        let mut owners = self.owners.load(Ordering::Acquire);
        loop {
            if owners == 0 {
                return false;
            }
            match self.owners.compare_exchange_weak(
                owners,
                owners + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => owners = current,
            }
        }
    }

    /// Removes an owner, closing the scope if it was the last one.
    pub fn release(&self) {
        let previous = self.owners.fetch_sub(1, Ordering::AcqRel);
        match previous {
            0 => panic!("released a cached value more often than it was acquired"),
            1 => {
                tracing::trace!("Last owner released, running finalizers");
                self.scope.close();
            }
            _ => {}
        }
    }
}

/// Leases a shared resource, returning `None` if it was finalized in the meantime.
pub(crate) fn lease<V>(resource: &Arc<Resource<V>>) -> Option<Lease<V>> {
    resource.try_acquire().then(|| Lease {
        resource: Arc::clone(resource),
    })
}

/// A lease on a cached value.
///
/// The value stays alive, and its finalizers stay pending, for as long as the lease is held.
/// Dropping the lease releases it. Cloning the lease acquires another one.
pub struct Lease<V> {
    resource: Arc<Resource<V>>,
}

impl<V> Lease<V> {
    /// The number of current owners of the leased value, including the cache slot if the value
    /// is still cached.
    pub fn owners(this: &Self) -> usize {
        this.resource.owners()
    }

    /// Whether both leases refer to the same computed value.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.resource, &other.resource)
    }
}

impl<V> Deref for Lease<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.resource.value
    }
}

impl<V> Clone for Lease<V> {
    fn clone(&self) -> Self {
        // we are an owner ourselves, so the count can't be zero
        self.resource.owners.fetch_add(1, Ordering::AcqRel);
        Lease {
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<V> Drop for Lease<V> {
    fn drop(&mut self) {
        self.resource.release();
    }
}

impl<V: fmt::Debug> fmt::Debug for Lease<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("value", &self.resource.value)
            .field("owners", &self.resource.owners())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn finalized_resource() -> (Arc<Resource<&'static str>>, Arc<AtomicBool>) {
        let finalized = Arc::new(AtomicBool::new(false));
        let scope = Scope::new();
        {
            let finalized = Arc::clone(&finalized);
            scope.add_finalizer(move || finalized.store(true, Ordering::SeqCst));
        }
        (Arc::new(Resource::new("value", scope)), finalized)
    }

    #[test]
    fn test_finalizes_after_last_owner() {
        let (resource, finalized) = finalized_resource();

        let first = lease(&resource).unwrap();
        let second = first.clone();
        assert_eq!(*first, "value");
        assert_eq!(Lease::owners(&first), 3);
        assert!(Lease::ptr_eq(&first, &second));

        // the cache slot goes away first
        resource.release();
        drop(first);
        assert!(!finalized.load(Ordering::SeqCst));

        drop(second);
        assert!(finalized.load(Ordering::SeqCst));
    }

    #[test]
    fn test_idle_value_is_not_finalized() {
        let (resource, finalized) = finalized_resource();
        drop(lease(&resource).unwrap());
        assert!(!finalized.load(Ordering::SeqCst));
        assert_eq!(resource.owners(), 1);
    }

    #[test]
    fn test_no_lease_after_finalization() {
        let (resource, finalized) = finalized_resource();
        resource.release();
        assert!(finalized.load(Ordering::SeqCst));
        assert!(lease(&resource).is_none());
    }

    #[test]
    #[should_panic(expected = "more often than it was acquired")]
    fn test_release_underflow_panics() {
        let (resource, _finalized) = finalized_resource();
        resource.release();
        resource.release();
    }
}
