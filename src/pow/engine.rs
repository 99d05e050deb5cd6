use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::Result;

/// Feature flags understood by the hash engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EngineFlags(u32);

impl EngineFlags {
    pub const DEFAULT: Self = Self(0);
    pub const LARGE_PAGES: Self = Self(1);
    pub const HARD_AES: Self = Self(2);
    pub const FULL_MEM: Self = Self(4);
    pub const JIT: Self = Self(8);
    pub const SECURE: Self = Self(16);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EngineFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EngineFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EngineFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineFlags({:#x})", self.0)
    }
}

/// The memory-hard hash function behind proof of work.
///
/// Releasing a cache, dataset or VM is dropping it. Datasets are filled
/// through a shared reference so disjoint ranges can be written from
/// several threads at once.
pub trait HashEngine: Sync {
    type Cache: Sync;
    type Dataset: Sync;
    type Vm;

    /// Flags recommended for this machine.
    fn recommended_flags(&self) -> EngineFlags;

    fn dataset_item_count(&self) -> u64;

    fn alloc_cache(&self, flags: EngineFlags) -> Result<Self::Cache>;

    fn init_cache(&self, cache: &mut Self::Cache, key: &[u8]);

    fn alloc_dataset(&self, flags: EngineFlags) -> Result<Self::Dataset>;

    /// Fills items `[start, start + count)`.
    fn init_dataset(&self, dataset: &Self::Dataset, cache: &Self::Cache, start: u64, count: u64) -> Result<()>;

    /// `None` when the engine cannot run with `flags`.
    fn create_vm(&self, flags: EngineFlags, cache: &Self::Cache, dataset: Option<&Self::Dataset>) -> Option<Self::Vm>;

    fn calculate_hash(&self, vm: &mut Self::Vm, input: &[u8]) -> [u8; 32];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_algebra() {
        let mut flags = EngineFlags::JIT | EngineFlags::HARD_AES;
        assert!(flags.contains(EngineFlags::JIT));
        assert!(!flags.contains(EngineFlags::LARGE_PAGES));
        assert!(flags.contains(EngineFlags::DEFAULT));

        flags |= EngineFlags::LARGE_PAGES;
        assert_eq!(flags.bits(), 11);
        assert_eq!(EngineFlags::from_bits(11), flags);
    }
}
