use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scoped_cache::{CacheBuilder, Scope, ScopedCache};
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `scoped_cache` crate and test
///    utilities and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("scoped_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A connection handed out by [`Connections`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub key: u32,
    /// Increases with every connection opened.
    pub serial: usize,
}

/// A fake connection pool, keeping track of how many connections are open.
///
/// Opening a connection to key `0` is refused. Opening connections only proceeds once the gate
/// has a permit, which is consumed in the process.
#[derive(Clone)]
pub struct Connections {
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

impl Connections {
    /// A pool opening connections right away.
    pub fn new() -> Self {
        Self::gated(Semaphore::MAX_PERMITS)
    }

    /// A pool that opens at most `permits` connections until [`release`](Self::release) is
    /// called.
    pub fn gated(permits: usize) -> Self {
        Self {
            open: Default::default(),
            opened: Default::default(),
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub async fn open(&self, key: u32) -> Result<Connection, String> {
        let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.acquire().await.unwrap().forget();
        if key == 0 {
            return Err("connection refused".into());
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Connection { key, serial })
    }

    pub fn close(&self, _connection: Connection) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }

    /// The number of connections currently open.
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// The number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

pub type ConnectionCache = ScopedCache<u32, Connection, String>;

/// Builds a cache of connections opened from `connections`.
pub fn connection_cache(
    connections: &Connections,
    builder: CacheBuilder<u32, Connection, String>,
) -> ConnectionCache {
    let connections = connections.clone();
    builder.build(move |key, scope: Scope| {
        let connections = connections.clone();
        async move {
            let releaser = connections.clone();
            scope
                .acquire_release(connections.open(key), move |connection| {
                    releaser.close(connection)
                })
                .await
        }
    })
}

/// Yields to other tasks until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}
