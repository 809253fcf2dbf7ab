use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use rand::Rng;
use serde::{Deserialize, Serialize};

use scoped_cache::{CacheConfig, Scope, ScopedCache};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn validate(&self) -> Result<()> {
        for (i, workload) in self.workloads.iter().enumerate() {
            if workload.concurrency == 0 || workload.keys == 0 {
                bail!("workload {i} needs a non-zero concurrency and key space");
            }
            let rates = [
                workload.failure_rate,
                workload.refresh_rate,
                workload.invalidate_rate,
            ];
            if rates.iter().any(|rate| !(0.0..=1.0).contains(rate)) {
                bail!("workload {i} has a rate outside of [0, 1]");
            }
            if workload.refresh_rate + workload.invalidate_rate > 1.0 {
                bail!("workload {i} refreshes and invalidates more than all of the time");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Operations pick their key uniformly from `0..keys`.
    pub keys: u64,
    /// How long a single lookup takes.
    #[serde(with = "humantime_serde", default)]
    pub latency: Duration,
    /// The share of lookups that fail.
    #[serde(default)]
    pub failure_rate: f64,
    /// The share of operations that are a `refresh` instead of a `get`.
    #[serde(default)]
    pub refresh_rate: f64,
    /// The share of operations that are an `invalidate` instead of a `get`.
    #[serde(default)]
    pub invalidate_rate: f64,
}

/// Counts the simulated resources held by cached values.
#[derive(Clone, Debug, Default)]
pub struct Resources {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Resources {
    fn acquire(&self, scope: &Scope) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let released = Arc::clone(&self.released);
        scope.add_finalizer(move || {
            released.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Resources that were acquired, but never released.
    pub fn leaked(&self) -> usize {
        self.acquired() - self.released.load(Ordering::Relaxed)
    }
}

pub type WorkloadCache = ScopedCache<u64, Vec<u8>, String>;

/// A workload ready to be run against its own cache.
pub struct PreparedWorkload {
    pub workload: Workload,
    pub cache: WorkloadCache,
    pub resources: Resources,
}

pub fn prepare_workload(index: usize, config: &CacheConfig, workload: Workload) -> PreparedWorkload {
    let resources = Resources::default();
    let latency = workload.latency;
    let failure_rate = workload.failure_rate;

    let cache = {
        let resources = resources.clone();
        ScopedCache::builder()
            .config(config)
            .name(format!("{}.{index}", config.name))
            .build(move |key: u64, scope: Scope| {
                let resources = resources.clone();
                async move {
                    tokio::time::sleep(latency).await;
                    if rand::rng().random_bool(failure_rate) {
                        return Err(format!("lookup of {key} failed"));
                    }
                    resources.acquire(&scope);
                    Ok(key.to_le_bytes().repeat(16))
                }
            })
    };

    PreparedWorkload {
        workload,
        cache,
        resources,
    }
}

/// Runs a single random operation of the workload.
pub async fn process_operation(prepared: &PreparedWorkload) {
    let PreparedWorkload {
        workload, cache, ..
    } = prepared;

    let key = rand::rng().random_range(0..workload.keys);
    let roll: f64 = rand::rng().random();

    if roll < workload.invalidate_rate {
        cache.invalidate(&key);
    } else if roll < workload.invalidate_rate + workload.refresh_rate {
        // failed lookups are part of the workload
        let _ = cache.refresh(key).await;
    } else {
        let _ = cache.get(key).await;
    }
}
