//! A resource-lifetime boundary with ordered finalizers.
//!
//! Every lookup runs inside a fresh [`Scope`]. Resources acquired by the lookup register their
//! release logic on that scope, and the cache closes the scope once the computed value is no
//! longer owned by anyone: neither the cache itself nor any outstanding [`Lease`](crate::Lease).
//!
//! Finalizers run exactly once, in reverse order of registration. A scope that is dropped without
//! being closed explicitly closes itself, so release logic also runs when a lookup fails, panics
//! or is cancelled.

use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

type Finalizer = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct ScopeState {
    finalizers: Vec<Finalizer>,
    closed: bool,
}

#[derive(Default)]
struct ScopeInner {
    state: Mutex<ScopeState>,
}

impl ScopeInner {
    fn close(&self) {
        let finalizers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return;
            }
            state.closed = true;
            mem::take(&mut state.finalizers)
        };

        for finalizer in finalizers.into_iter().rev() {
            finalizer();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A handle to a structured scope.
///
/// Handles are cheap to clone and all refer to the same scope.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a new, open scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a finalizer which runs when the scope closes.
    ///
    /// If the scope is already closed, the finalizer runs immediately.
    pub fn add_finalizer<F>(&self, finalizer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            drop(state);
            finalizer();
        } else {
            state.finalizers.push(Box::new(finalizer));
        }
    }

    /// Acquires a resource and ties its release to this scope.
    ///
    /// `release` is only registered if `acquire` succeeds, and it receives a clone of the
    /// acquired resource.
    pub async fn acquire_release<T, E, A, R>(&self, acquire: A, release: R) -> Result<T, E>
    where
        A: Future<Output = Result<T, E>>,
        R: FnOnce(T) + Send + 'static,
        T: Clone + Send + 'static,
    {
        let resource = acquire.await?;
        let released = resource.clone();
        self.add_finalizer(move || release(released));
        Ok(resource)
    }

    /// Whether the scope has been closed already.
    pub fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    /// Runs all registered finalizers, in reverse order.
    ///
    /// Closing an already closed scope does nothing.
    pub(crate) fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Scope")
            .field("finalizers", &state.finalizers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Finalizer) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &'static str| -> Finalizer {
                let log = Arc::clone(&log);
                Box::new(move || log.lock().unwrap().push(name))
            }
        };
        (log, make)
    }

    #[test]
    fn test_finalizers_run_in_reverse_order() {
        let (log, finalizer) = recorder();
        let scope = Scope::new();
        scope.add_finalizer(finalizer("first"));
        scope.add_finalizer(finalizer("second"));

        scope.close();
        assert_eq!(*log.lock().unwrap(), ["second", "first"]);

        // closing twice is a no-op
        scope.close();
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(scope.is_closed());
    }

    #[test]
    fn test_late_finalizer_runs_immediately() {
        let (log, finalizer) = recorder();
        let scope = Scope::new();
        scope.close();

        scope.add_finalizer(finalizer("late"));
        assert_eq!(*log.lock().unwrap(), ["late"]);
    }

    #[test]
    fn test_dropped_scope_closes() {
        let (log, finalizer) = recorder();
        let scope = Scope::new();
        let other_handle = scope.clone();
        scope.add_finalizer(finalizer("dropped"));

        drop(scope);
        assert!(log.lock().unwrap().is_empty());

        drop(other_handle);
        assert_eq!(*log.lock().unwrap(), ["dropped"]);
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let released = Arc::new(Mutex::new(None));
        let scope = Scope::new();

        let value = {
            let released = Arc::clone(&released);
            scope
                .acquire_release(async { Ok::<_, ()>(42) }, move |value| {
                    *released.lock().unwrap() = Some(value);
                })
                .await
        };
        assert_eq!(value, Ok(42));
        assert_eq!(*released.lock().unwrap(), None);

        let failed = scope
            .acquire_release(async { Err::<u32, _>("nope") }, |_| unreachable!())
            .await;
        assert_eq!(failed, Err("nope"));

        scope.close();
        assert_eq!(*released.lock().unwrap(), Some(42));
    }
}
