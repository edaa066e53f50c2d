//! Registry of per-output config slot stores.
//!
//! Lock order is encoded in the types: the per-slot locks in
//! [`ConfigSlotStore`] are only reachable through a [`RegistryGuard`], so the
//! coarse registry lock is always taken before any slot lock and the reverse
//! ordering cannot be written.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use paperconfig::WallpaperConfig;

use crate::backend::OutputId;
use crate::slots::{ConfigSlotStore, SlotReadGuard, SlotWriteGuard};

#[derive(Default)]
pub struct OutputRegistry {
    entries: RwLock<BTreeMap<OutputId, Arc<ConfigSlotStore>>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: OutputId, initial: WallpaperConfig) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(id, Arc::new(ConfigSlotStore::new(initial)));
    }

    pub fn remove(&self, id: OutputId) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.remove(&id);
    }

    /// Takes the registry read lock. All slot access goes through the
    /// returned guard.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            entries: self.entries.read().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

pub struct RegistryGuard<'a> {
    entries: RwLockReadGuard<'a, BTreeMap<OutputId, Arc<ConfigSlotStore>>>,
}

impl RegistryGuard<'_> {
    pub fn ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        self.entries.keys().copied()
    }

    pub fn generation(&self, id: OutputId) -> Option<u64> {
        self.entries.get(&id).map(|store| store.generation())
    }

    /// Read access to the active config of one output.
    pub fn config(&self, id: OutputId) -> Option<SlotReadGuard<'_>> {
        self.entries.get(&id).map(|store| store.read())
    }

    /// Write access to the inactive slot of one output. Publishing the
    /// returned guard makes the staged config active.
    pub fn begin_write(&self, id: OutputId) -> Option<SlotWriteGuard<'_>> {
        self.entries.get(&id).map(|store| store.write())
    }
}
