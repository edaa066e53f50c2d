//! Redraw pacing for one output.
//!
//! Static content needs no redraws at all; animated content is paced either
//! by the display's own frame callbacks (vsync) or by a timer at a target
//! frame rate. The pacer only tracks *when* the next timer-driven redraw is
//! due; transitions and rotation deadlines are folded in by the driver.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    /// Redraw on every display frame callback; no timer involved.
    Continuous,
    /// Redraw on a timer at a fixed interval.
    Interval(Duration),
    /// No scheduled redraws; the content is static.
    Inactive,
}

pub struct FramePacer {
    mode: PacingMode,
    next_due: Option<Instant>,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            mode: PacingMode::Inactive,
            next_due: None,
        }
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    /// Switches pacing mode. A no-op when the mode is unchanged, so the
    /// timer phase is preserved across frames.
    pub fn configure(&mut self, mode: PacingMode, now: Instant) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.next_due = match mode {
            PacingMode::Interval(interval) => Some(now + interval),
            _ => None,
        };
    }

    /// Whether a timer-driven redraw is due, re-arming for the next one.
    /// After a stall the next deadline is measured from `now` rather than
    /// firing a burst of catch-up frames.
    pub fn due(&mut self, now: Instant) -> bool {
        let PacingMode::Interval(interval) = self.mode else {
            return false;
        };
        let Some(due_at) = self.next_due else {
            self.next_due = Some(now + interval);
            return true;
        };
        if now < due_at {
            return false;
        }
        let mut next = due_at + interval;
        if next <= now {
            next = now + interval;
        }
        self.next_due = Some(next);
        true
    }

    /// Deadline for the runtime's timer source, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.mode {
            PacingMode::Interval(_) => self.next_due,
            _ => None,
        }
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

/// Interval for a target frame rate. Rates at or below zero pace nothing.
pub fn interval_for_fps(fps: f32) -> Option<Duration> {
    if fps.is_finite() && fps > 0.0 {
        // f64 keeps round rates exact; 1.0/10.0 in f32 is a hair over 100ms.
        Some(Duration::from_secs_f64(1.0 / f64::from(fps)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn inactive_is_never_due() {
        let mut pacer = FramePacer::new();
        assert!(!pacer.due(Instant::now()));
        assert_eq!(pacer.deadline(), None);
    }

    #[test]
    fn interval_fires_on_schedule() {
        let start = Instant::now();
        let mut pacer = FramePacer::new();
        pacer.configure(PacingMode::Interval(TICK), start);

        assert!(!pacer.due(start + TICK / 2));
        assert!(pacer.due(start + TICK));
        assert_eq!(pacer.deadline(), Some(start + TICK * 2));
        assert!(!pacer.due(start + TICK + TICK / 2));
        assert!(pacer.due(start + TICK * 2));
    }

    #[test]
    fn stall_rearms_from_now_without_burst() {
        let start = Instant::now();
        let mut pacer = FramePacer::new();
        pacer.configure(PacingMode::Interval(TICK), start);

        // Ten intervals pass in one gulp.
        let late = start + TICK * 10;
        assert!(pacer.due(late));
        // Only one frame fires; the next is a full interval out.
        assert!(!pacer.due(late + TICK / 2));
        assert!(pacer.due(late + TICK));
    }

    #[test]
    fn reconfigure_to_same_mode_keeps_phase() {
        let start = Instant::now();
        let mut pacer = FramePacer::new();
        pacer.configure(PacingMode::Interval(TICK), start);
        let deadline = pacer.deadline();
        pacer.configure(PacingMode::Interval(TICK), start + TICK / 2);
        assert_eq!(pacer.deadline(), deadline);
    }

    #[test]
    fn continuous_mode_uses_no_timer() {
        let start = Instant::now();
        let mut pacer = FramePacer::new();
        pacer.configure(PacingMode::Continuous, start);
        assert!(!pacer.due(start + TICK * 5));
        assert_eq!(pacer.deadline(), None);
    }

    #[test]
    fn fps_interval_conversion() {
        assert_eq!(interval_for_fps(10.0), Some(Duration::from_millis(100)));
        assert_eq!(interval_for_fps(0.0), None);
        assert_eq!(interval_for_fps(-5.0), None);
        assert_eq!(interval_for_fps(f32::NAN), None);
    }
}
