//! Double-buffered configuration slots.
//!
//! Each output owns a [`ConfigSlotStore`] holding two copies of its
//! [`WallpaperConfig`]. Readers take a short lock on the active slot; a
//! reload writes the candidate into the inactive slot and flips the active
//! index only once the new value has validated, so a failed reload can never
//! leave a reader looking at a half-written config.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use paperconfig::WallpaperConfig;

struct ConfigSlot {
    config: WallpaperConfig,
    valid: bool,
}

pub struct ConfigSlotStore {
    slots: [Mutex<ConfigSlot>; 2],
    active: AtomicUsize,
    generation: AtomicU64,
}

impl ConfigSlotStore {
    pub fn new(initial: WallpaperConfig) -> Self {
        Self {
            slots: [
                Mutex::new(ConfigSlot {
                    config: initial.clone(),
                    valid: true,
                }),
                Mutex::new(ConfigSlot {
                    config: initial,
                    valid: false,
                }),
            ],
            active: AtomicUsize::new(0),
            generation: AtomicU64::new(1),
        }
    }

    /// Monotonic counter bumped on every publish. Readers compare it against
    /// the value they last acted on to detect a config change cheaply.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn read(&self) -> SlotReadGuard<'_> {
        let index = self.active.load(Ordering::Acquire);
        let guard = self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        SlotReadGuard { guard }
    }

    pub(crate) fn write(&self) -> SlotWriteGuard<'_> {
        let index = 1 - self.active.load(Ordering::Acquire);
        let mut guard = self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.valid = false;
        SlotWriteGuard {
            store: self,
            index,
            guard,
        }
    }
}

/// Read access to the active slot. Hold briefly; clone out what you need.
pub struct SlotReadGuard<'a> {
    guard: MutexGuard<'a, ConfigSlot>,
}

impl Deref for SlotReadGuard<'_> {
    type Target = WallpaperConfig;

    fn deref(&self) -> &WallpaperConfig {
        &self.guard.config
    }
}

/// Write access to the inactive slot. The new config only becomes visible
/// through [`SlotWriteGuard::publish`]; dropping the guard without publishing
/// discards the candidate.
pub struct SlotWriteGuard<'a> {
    store: &'a ConfigSlotStore,
    index: usize,
    guard: MutexGuard<'a, ConfigSlot>,
}

impl SlotWriteGuard<'_> {
    pub fn set(&mut self, config: WallpaperConfig) {
        self.guard.config = config;
        self.guard.valid = true;
    }

    /// Flips the active slot to the written candidate and bumps the
    /// generation. A publish without a prior [`set`](Self::set) is a no-op.
    pub fn publish(self) {
        if !self.guard.valid {
            tracing::warn!("publish without a staged config; keeping previous");
            return;
        }
        self.store.active.store(self.index, Ordering::Release);
        self.store.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(duration_secs: u64) -> WallpaperConfig {
        WallpaperConfig {
            mode: paperconfig::DisplayMode::Fill,
            duration: Duration::from_secs(duration_secs),
            transition: paperconfig::TransitionKind::Fade,
            transition_duration: Duration::from_millis(300),
            animation: paperconfig::AnimationSettings::default(),
            order: paperconfig::RotationOrder::Continuous,
            rotation: vec![paperconfig::RotationTarget::Image {
                image: "/walls/a.png".into(),
            }],
            rotation_index: 0,
            channels: Vec::new(),
        }
    }

    #[test]
    fn publish_flips_active_and_bumps_generation() {
        let store = ConfigSlotStore::new(config(10));
        assert_eq!(store.generation(), 1);
        assert_eq!(store.read().duration, Duration::from_secs(10));

        let mut writer = store.write();
        writer.set(config(20));
        writer.publish();

        assert_eq!(store.generation(), 2);
        assert_eq!(store.read().duration, Duration::from_secs(20));
    }

    #[test]
    fn dropped_writer_discards_candidate() {
        let store = ConfigSlotStore::new(config(10));
        {
            let mut writer = store.write();
            writer.set(config(99));
            // No publish.
        }
        assert_eq!(store.generation(), 1);
        assert_eq!(store.read().duration, Duration::from_secs(10));
    }

    #[test]
    fn publish_without_set_keeps_previous() {
        let store = ConfigSlotStore::new(config(10));
        store.write().publish();
        assert_eq!(store.generation(), 1);
        assert_eq!(store.read().duration, Duration::from_secs(10));
    }

    #[test]
    fn repeated_publishes_alternate_slots() {
        let store = ConfigSlotStore::new(config(1));
        for secs in 2..6 {
            let mut writer = store.write();
            writer.set(config(secs));
            writer.publish();
            assert_eq!(store.read().duration, Duration::from_secs(secs));
        }
        assert_eq!(store.generation(), 5);
    }
}
