//! Proof-of-work hashing setup.
//!
//! The hash function itself is an external engine behind [`HashEngine`].
//! This module owns the setup around it: the fork-join dataset build and
//! the VM flag fallback.

mod dataset;
mod engine;

pub use dataset::{CancelToken, DEFAULT_CHUNK_ITEMS, DatasetBuilder, DatasetWorkItem, partition};
pub use engine::{EngineFlags, HashEngine};

use tracing::info;

use crate::error::Result;

/// A ready-to-hash VM with the memory it runs on.
pub struct PowContext<E: HashEngine> {
    // fields drop in order: the VM goes before its cache and dataset
    vm: E::Vm,
    dataset: Option<E::Dataset>,
    cache: E::Cache,
}

impl<E: HashEngine> PowContext<E> {
    /// Builds a context for `key`. A full dataset is built only when the
    /// engine recommends full-memory mode.
    pub fn new(builder: &DatasetBuilder<E>, key: &[u8], workers: usize) -> Result<Self> {
        let mut cache = builder.alloc_cache()?;
        builder.init_cache(&mut cache, key);

        let dataset = if builder.flags().contains(EngineFlags::FULL_MEM) {
            let dataset = builder.alloc_dataset()?;
            Some(builder.init_dataset(&cache, dataset, workers)?)
        } else {
            None
        };

        let vm = builder.create_vm(&cache, dataset.as_ref())?;
        info!(full_mem = dataset.is_some(), "pow context ready");
        Ok(Self { vm, dataset, cache })
    }

    pub fn hash(&mut self, builder: &DatasetBuilder<E>, input: &[u8]) -> [u8; 32] {
        builder.engine().calculate_hash(&mut self.vm, input)
    }

    pub fn dataset(&self) -> Option<&E::Dataset> {
        self.dataset.as_ref()
    }
}
