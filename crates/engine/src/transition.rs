//! Two-texture transition engine.
//!
//! While a transition runs, the engine owns the outgoing texture and the
//! driver owns the incoming one; the backend blends them by eased progress.
//! When the transition completes (or is superseded), the outgoing texture is
//! handed back so the backend can release it.

use std::time::{Duration, Instant};

use paperconfig::TransitionKind;

pub struct TransitionFrame {
    pub raw: f32,
    pub eased: f32,
    pub kind: TransitionKind,
}

struct TransitionState<T> {
    start: Instant,
    duration: Duration,
    kind: TransitionKind,
    outgoing: T,
}

pub struct TransitionEngine<T> {
    active: Option<TransitionState<T>>,
}

impl<T> TransitionEngine<T> {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a transition away from `outgoing`. If a transition was already
    /// running its outgoing texture is returned so it can be released; the
    /// interrupted blend is abandoned and the new one starts from zero.
    pub fn begin(
        &mut self,
        outgoing: T,
        kind: TransitionKind,
        duration: Duration,
        now: Instant,
    ) -> Option<T> {
        let superseded = self.active.take().map(|state| state.outgoing);
        self.active = Some(TransitionState {
            start: now,
            duration,
            kind,
            outgoing,
        });
        superseded
    }

    /// Blend parameters for the current frame, or `None` when idle.
    pub fn frame(&self, now: Instant) -> Option<TransitionFrame> {
        let state = self.active.as_ref()?;
        let raw = if state.duration.is_zero() {
            1.0
        } else {
            (now.saturating_duration_since(state.start).as_secs_f32()
                / state.duration.as_secs_f32())
            .clamp(0.0, 1.0)
        };
        Some(TransitionFrame {
            raw,
            eased: ease_in_out_cubic(raw),
            kind: state.kind,
        })
    }

    /// Returns the outgoing texture once the transition has run to
    /// completion, leaving the engine idle.
    pub fn finish_if_complete(&mut self, now: Instant) -> Option<T> {
        let done = self
            .active
            .as_ref()
            .map_or(false, |state| {
                now.saturating_duration_since(state.start) >= state.duration
            });
        if done {
            self.active.take().map(|state| state.outgoing)
        } else {
            None
        }
    }

    /// The outgoing texture of the running transition, for blending.
    pub fn outgoing(&self) -> Option<&T> {
        self.active.as_ref().map(|state| &state.outgoing)
    }

    /// Aborts any running transition, returning its outgoing texture.
    pub fn cancel(&mut self) -> Option<T> {
        self.active.take().map(|state| state.outgoing)
    }
}

impl<T> Default for TransitionEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Symmetric easing with zero slope at both endpoints.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}
