//! Daemon-wide control flags shared between the runtime and control sources.

use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle and control state for the whole engine. One instance is shared
/// by the render loop, the IPC listener, and the config watcher.
pub struct EngineControl {
    running: AtomicBool,
    paused: AtomicBool,
    reload_requested: AtomicBool,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            reload_requested: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Release);
    }

    /// Consumes a pending reload request. Coalesces bursts from the file
    /// watcher into a single reload.
    pub fn take_reload(&self) -> bool {
        self.reload_requested.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_request_is_consumed_once() {
        let control = EngineControl::new();
        assert!(!control.take_reload());
        control.request_reload();
        control.request_reload();
        assert!(control.take_reload());
        assert!(!control.take_reload());
    }

    #[test]
    fn pause_resume_round_trip() {
        let control = EngineControl::new();
        assert!(control.is_running());
        assert!(!control.is_paused());
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
        control.shutdown();
        assert!(!control.is_running());
    }
}
