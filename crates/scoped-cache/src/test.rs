//! Helpers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::Scope;

/// Installs a log subscriber that plays nice with the test harness.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("scoped_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts lookups, and records the values whose finalizers ran.
#[derive(Clone, Default)]
pub struct Probe {
    calls: Arc<AtomicUsize>,
    finalized: Arc<Mutex<Vec<usize>>>,
}

impl Probe {
    /// Registers one lookup, returning its 1-based number.
    ///
    /// The number is recorded as finalized once `scope` closes.
    pub fn call(&self, scope: &Scope) -> usize {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let finalized = Arc::clone(&self.finalized);
        scope.add_finalizer(move || finalized.lock().unwrap().push(call));
        call
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> Vec<usize> {
        self.finalized.lock().unwrap().clone()
    }
}
