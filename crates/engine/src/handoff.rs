//! Single-slot handoff between a worker thread and the render thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One-value mailbox. The producer stages a value, the consumer takes it.
/// Staging again before a take replaces the previous value.
pub struct HandoffSlot<V> {
    value: Mutex<Option<V>>,
    pending: AtomicBool,
}

impl<V> HandoffSlot<V> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            pending: AtomicBool::new(false),
        }
    }

    pub fn stage(&self, value: V) -> Option<V> {
        let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = slot.replace(value);
        self.pending.store(true, Ordering::Release);
        previous
    }

    /// Cheap check for the consumer's hot path; avoids taking the lock when
    /// nothing is staged.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn take(&self) -> Option<V> {
        if !self.is_pending() {
            return None;
        }
        let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        self.pending.store(false, Ordering::Release);
        slot.take()
    }

    pub fn clear(&self) -> Option<V> {
        let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        self.pending.store(false, Ordering::Release);
        slot.take()
    }
}

impl<V> Default for HandoffSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag shared with worker threads.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_then_take() {
        let slot = HandoffSlot::new();
        assert!(!slot.is_pending());
        assert_eq!(slot.stage(1), None);
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(1));
        assert!(!slot.is_pending());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn restaging_replaces_previous() {
        let slot = HandoffSlot::new();
        assert_eq!(slot.stage("a"), None);
        assert_eq!(slot.stage("b"), Some("a"));
        assert_eq!(slot.take(), Some("b"));
    }

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
