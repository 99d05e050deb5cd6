use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::engine::{EngineFlags, HashEngine};
use crate::config::CryptoConfig;
use crate::error::{CryptoError, Result};

/// Items a worker initialises between cancellation checks.
pub const DEFAULT_CHUNK_ITEMS: u64 = 1 << 14;

/// A contiguous range of dataset items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetWorkItem {
    pub start: u64,
    pub count: u64,
}

/// Splits `total` items over `workers`: every range gets `total / workers`
/// items and the last one also takes the remainder.
pub fn partition(total: u64, workers: usize) -> Vec<DatasetWorkItem> {
    let workers = workers.max(1) as u64;
    let delta = total / workers;
    let mut items = Vec::with_capacity(workers as usize);
    let mut start = 0;
    for _ in 0..workers - 1 {
        items.push(DatasetWorkItem { start, count: delta });
        start += delta;
    }
    items.push(DatasetWorkItem {
        start,
        count: total - start,
    });
    items
}

/// Shared flag that stops a running dataset build at the next chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct DatasetBuilder<E: HashEngine> {
    engine: E,
    flags: EngineFlags,
    chunk_items: u64,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

impl<E: HashEngine> DatasetBuilder<E> {
    pub fn new(engine: E) -> Self {
        let flags = engine.recommended_flags();
        debug!(?flags, "hash engine flags");
        Self {
            engine,
            flags,
            chunk_items: DEFAULT_CHUNK_ITEMS,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(engine: E, config: &CryptoConfig) -> Self {
        Self::new(engine).with_deadline(config.dataset_deadline())
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_chunk_items(mut self, chunk_items: u64) -> Self {
        self.chunk_items = chunk_items.max(1);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn flags(&self) -> EngineFlags {
        self.flags
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn alloc_cache(&self) -> Result<E::Cache> {
        self.engine.alloc_cache(self.flags)
    }

    pub fn init_cache(&self, cache: &mut E::Cache, key: &[u8]) {
        self.engine.init_cache(cache, key);
    }

    pub fn alloc_dataset(&self) -> Result<E::Dataset> {
        self.engine.alloc_dataset(self.flags)
    }

    /// Fills `dataset` from `cache` using `workers` threads.
    ///
    /// The dataset is handed back only when every range completed. On a
    /// worker error or panic, a passed deadline, or an external cancel, the
    /// remaining workers stop at their next chunk and the dataset is dropped.
    pub fn init_dataset(&self, cache: &E::Cache, dataset: E::Dataset, workers: usize) -> Result<E::Dataset> {
        let total = self.engine.dataset_item_count();
        let ranges = partition(total, workers);
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        info!(total, workers = ranges.len(), "initialising dataset");

        if let [only] = ranges.as_slice() {
            if let Err(e) = self.run_guarded(0, cache, &dataset, *only, &stop, deadline) {
                warn!(worker = 0, error = %e, "dataset worker failed");
                return Err(e);
            }
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "dataset ready");
            return Ok(dataset);
        }

        let failure = thread::scope(|s| {
            let (tx, rx) = mpsc::channel();
            let mut failure = None;

            for (i, item) in ranges.iter().copied().enumerate() {
                let tx = tx.clone();
                let (stop, dataset) = (&stop, &dataset);
                let spawned = thread::Builder::new()
                    .name(format!("dataset-{i}"))
                    .spawn_scoped(s, move || {
                        let result = self.run_guarded(i, cache, dataset, item, stop, deadline);
                        // receiver outlives every worker
                        let _ = tx.send((i, result));
                    });
                if let Err(e) = spawned {
                    stop.store(true, Ordering::Release);
                    failure = Some(CryptoError::DatasetBuild(format!("failed to spawn worker {i}: {e}")));
                    break;
                }
            }
            drop(tx);

            for (i, result) in rx {
                if let Err(e) = result {
                    stop.store(true, Ordering::Release);
                    warn!(worker = i, error = %e, "dataset worker failed");
                    failure.get_or_insert(e);
                }
            }
            failure
        });

        match failure {
            Some(e) => Err(e),
            None => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "dataset ready");
                Ok(dataset)
            }
        }
    }

    /// [`Self::run_range`] with a panic turned into a build failure.
    fn run_guarded(
        &self,
        worker: usize,
        cache: &E::Cache,
        dataset: &E::Dataset,
        item: DatasetWorkItem,
        stop: &AtomicBool,
        deadline: Option<Instant>,
    ) -> Result<()> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run_range(cache, dataset, item, stop, deadline)))
            .unwrap_or_else(|_| Err(CryptoError::DatasetBuild(format!("worker {worker} panicked"))))
    }

    fn run_range(
        &self,
        cache: &E::Cache,
        dataset: &E::Dataset,
        item: DatasetWorkItem,
        stop: &AtomicBool,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let end = item.start + item.count;
        let mut start = item.start;
        while start < end {
            if stop.load(Ordering::Acquire) || self.cancel.is_cancelled() {
                return Err(CryptoError::DatasetBuild("cancelled".into()));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(CryptoError::DatasetBuild("deadline exceeded".into()));
            }
            let count = self.chunk_items.min(end - start);
            self.engine
                .init_dataset(dataset, cache, start, count)
                .map_err(|e| CryptoError::DatasetBuild(format!("items {start}..{}: {e}", start + count)))?;
            start += count;
        }
        Ok(())
    }

    /// Creates a VM, first with large pages, then with the recommended
    /// flags alone, then with the defaults.
    pub fn create_vm(&self, cache: &E::Cache, dataset: Option<&E::Dataset>) -> Result<E::Vm> {
        let attempts = [self.flags | EngineFlags::LARGE_PAGES, self.flags, EngineFlags::DEFAULT];
        for flags in attempts {
            match self.engine.create_vm(flags, cache, dataset) {
                Some(vm) => {
                    debug!(?flags, "hash VM created");
                    return Ok(vm);
                }
                None => warn!(?flags, "hash VM creation failed"),
            }
        }
        Err(CryptoError::VmCreation)
    }
}
