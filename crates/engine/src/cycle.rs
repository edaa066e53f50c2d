//! Rotation state machine for one output.
//!
//! Decides *when* the displayed target changes and *which* rotation index
//! comes next. All timing flows in through `now: Instant` parameters, so the
//! whole state machine is testable without sleeping.

use std::time::Instant;

use paperconfig::RotationOrder;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Why an advance fired. Skips win ties against the elapsed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    Skip,
    Elapsed,
}

pub struct CycleController {
    last_cycle: Instant,
    pending_skips: u32,
    paused_at: Option<Instant>,
    order: Vec<usize>,
    cursor: usize,
    shuffle: bool,
    rng: StdRng,
}

impl CycleController {
    pub fn new(
        now: Instant,
        len: usize,
        order: RotationOrder,
        start_index: usize,
        seed: u64,
    ) -> Self {
        let mut controller = Self {
            last_cycle: now,
            pending_skips: 0,
            paused_at: None,
            order: Vec::new(),
            cursor: 0,
            shuffle: matches!(order, RotationOrder::Shuffle),
            rng: StdRng::seed_from_u64(seed),
        };
        controller.rebuild(now, len, order, start_index);
        controller
    }

    /// Rebuilds the visit order after a config change. The pause state and
    /// accumulated skips carry over; the interval timer restarts.
    pub fn rebuild(&mut self, now: Instant, len: usize, order: RotationOrder, start_index: usize) {
        self.shuffle = matches!(order, RotationOrder::Shuffle);
        self.order = (0..len.max(1)).collect();
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        // The starting target leads regardless of order.
        if let Some(position) = self.order.iter().position(|&i| i == start_index.min(len.saturating_sub(1))) {
            self.order.swap(0, position);
        }
        self.cursor = 0;
        self.last_cycle = now;
        // The interval timer restarted at `now`; any pause span before the
        // rebuild must not be credited back on resume.
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }

    /// Index of the currently displayed rotation entry.
    pub fn current(&self) -> usize {
        self.order[self.cursor]
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Queues one manual advance. Safe to call from any state; while paused
    /// the skip is held until resume.
    pub fn skip(&mut self) {
        self.pending_skips = self.pending_skips.saturating_add(1);
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Resumes rotation. The paused span does not count against the display
    /// interval, so a picture shown for 10s of a 60s interval before a pause
    /// still gets its remaining 50s.
    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.last_cycle += now.saturating_duration_since(paused_at);
        }
    }

    /// Whether an advance is due at `now`. Returns at most one reason per
    /// call; callers advance and ask again, so queued skips drain one by one.
    pub fn due(&mut self, now: Instant, interval: std::time::Duration) -> Option<AdvanceReason> {
        if self.paused_at.is_some() {
            return None;
        }
        if self.pending_skips > 0 {
            return Some(AdvanceReason::Skip);
        }
        if self.order.len() > 1 && now.saturating_duration_since(self.last_cycle) >= interval {
            return Some(AdvanceReason::Elapsed);
        }
        None
    }

    /// Moves to the next rotation index and restarts the interval timer.
    pub fn advance(&mut self, now: Instant) -> usize {
        self.pending_skips = self.pending_skips.saturating_sub(1);
        self.cursor += 1;
        if self.cursor >= self.order.len() {
            self.cursor = 0;
            if self.shuffle && self.order.len() > 1 {
                let last_shown = *self.order.last().unwrap_or(&0);
                self.order.shuffle(&mut self.rng);
                // Avoid showing the same entry twice in a row across a wrap.
                if self.order[0] == last_shown {
                    let end = self.order.len() - 1;
                    self.order.swap(0, end);
                }
            }
        }
        self.last_cycle = now;
        self.current()
    }

    /// Index most likely shown next, for preloading. Across a shuffle wrap
    /// the reshuffle may pick something else; preloads are best effort.
    pub fn peek_next(&self) -> usize {
        self.order[(self.cursor + 1) % self.order.len()]
    }

    /// Deadline of the next interval-driven advance, for the frame pacer.
    pub fn next_deadline(&self, interval: std::time::Duration) -> Option<Instant> {
        if self.paused_at.is_some() || self.order.len() <= 1 {
            return None;
        }
        Some(self.last_cycle + interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn controller(len: usize, order: RotationOrder) -> (CycleController, Instant) {
        let now = Instant::now();
        (CycleController::new(now, len, order, 0, 7), now)
    }

    #[test]
    fn advances_after_interval_elapses() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        assert_eq!(cycle.due(start + Duration::from_secs(59), INTERVAL), None);
        let now = start + INTERVAL;
        assert_eq!(cycle.due(now, INTERVAL), Some(AdvanceReason::Elapsed));
        assert_eq!(cycle.advance(now), 1);
        // Timer restarted from the advance.
        assert_eq!(cycle.due(now + Duration::from_secs(59), INTERVAL), None);
    }

    #[test]
    fn continuous_order_wraps() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        let mut now = start;
        let mut seen = vec![cycle.current()];
        for _ in 0..5 {
            now += INTERVAL;
            cycle.advance(now);
            seen.push(cycle.current());
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn skip_fires_immediately_and_resets_timer() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        let now = start + Duration::from_secs(30);
        cycle.skip();
        assert_eq!(cycle.due(now, INTERVAL), Some(AdvanceReason::Skip));
        cycle.advance(now);
        // Full interval again from the skip.
        assert_eq!(cycle.due(now + Duration::from_secs(59), INTERVAL), None);
        assert_eq!(
            cycle.due(now + INTERVAL, INTERVAL),
            Some(AdvanceReason::Elapsed)
        );
    }

    #[test]
    fn skip_wins_tie_against_elapsed() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        cycle.skip();
        assert_eq!(
            cycle.due(start + INTERVAL, INTERVAL),
            Some(AdvanceReason::Skip)
        );
    }

    #[test]
    fn pause_stops_the_clock() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        cycle.pause(start + Duration::from_secs(10));
        assert_eq!(cycle.due(start + Duration::from_secs(600), INTERVAL), None);

        // 10s of the interval were used before the pause; after resume the
        // remaining 50s still have to elapse.
        let resumed = start + Duration::from_secs(600);
        cycle.resume(resumed);
        assert_eq!(cycle.due(resumed + Duration::from_secs(49), INTERVAL), None);
        assert_eq!(
            cycle.due(resumed + Duration::from_secs(50), INTERVAL),
            Some(AdvanceReason::Elapsed)
        );
    }

    #[test]
    fn skips_accumulate_during_pause() {
        let (mut cycle, start) = controller(4, RotationOrder::Continuous);
        cycle.pause(start);
        cycle.skip();
        cycle.skip();
        assert_eq!(cycle.due(start + INTERVAL, INTERVAL), None);

        let resumed = start + Duration::from_secs(5);
        cycle.resume(resumed);
        assert_eq!(cycle.due(resumed, INTERVAL), Some(AdvanceReason::Skip));
        cycle.advance(resumed);
        assert_eq!(cycle.due(resumed, INTERVAL), Some(AdvanceReason::Skip));
        cycle.advance(resumed);
        assert_eq!(cycle.due(resumed, INTERVAL), None);
        assert_eq!(cycle.current(), 2);
    }

    #[test]
    fn single_entry_never_becomes_due() {
        let (mut cycle, start) = controller(1, RotationOrder::Continuous);
        assert_eq!(cycle.due(start + INTERVAL * 10, INTERVAL), None);
        assert_eq!(cycle.next_deadline(INTERVAL), None);
    }

    #[test]
    fn shuffle_visits_every_entry_each_round() {
        let now = Instant::now();
        let mut cycle = CycleController::new(now, 5, RotationOrder::Shuffle, 2, 42);
        assert_eq!(cycle.current(), 2);

        let mut clock = now;
        for _ in 0..3 {
            let mut round = BTreeSet::new();
            round.insert(cycle.current());
            for _ in 0..4 {
                clock += INTERVAL;
                round.insert(cycle.advance(clock));
            }
            assert_eq!(round.len(), 5);
            clock += INTERVAL;
            cycle.advance(clock);
        }
    }

    #[test]
    fn shuffle_never_repeats_across_wrap() {
        let now = Instant::now();
        let mut cycle = CycleController::new(now, 4, RotationOrder::Shuffle, 0, 9);
        let mut clock = now;
        let mut previous = cycle.current();
        for _ in 0..40 {
            clock += INTERVAL;
            let next = cycle.advance(clock);
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn rebuild_restarts_interval_and_keeps_pause() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        cycle.pause(start);
        let later = start + Duration::from_secs(30);
        cycle.rebuild(later, 5, RotationOrder::Continuous, 4);
        assert!(cycle.is_paused());
        assert_eq!(cycle.current(), 4);
    }

    #[test]
    fn rebuild_while_paused_forgets_earlier_pause_span() {
        let (mut cycle, start) = controller(3, RotationOrder::Continuous);
        cycle.pause(start);
        // Config reload lands mid-pause; the interval restarts here.
        cycle.rebuild(start + Duration::from_secs(30), 3, RotationOrder::Continuous, 0);

        let resumed = start + Duration::from_secs(60);
        cycle.resume(resumed);
        // Only the 30s paused after the rebuild are credited back, so a full
        // interval from resume makes the advance due.
        assert_eq!(cycle.due(resumed + INTERVAL - Duration::from_secs(1), INTERVAL), None);
        assert_eq!(
            cycle.due(resumed + INTERVAL, INTERVAL),
            Some(AdvanceReason::Elapsed)
        );
    }
}
