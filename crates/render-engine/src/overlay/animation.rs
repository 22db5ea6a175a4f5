//! Word animation curves and the highlight slide state machine.

use super::layer::Rect;
use crate::cue_index::animation_progress;

/// Share of a word's duration spent scaling up, and again scaling down.
const POP_RAMP: f64 = 0.2;

/// `1 - (1 - t)^3`, with `t` clamped to `[0, 1]`.
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Scale of the active word at `progress` through its duration.
///
/// Rises from 1 to `peak` over the first 20%, holds, then returns to 1 over
/// the final 20%.
pub fn pop_scale(progress: f64, peak: f32) -> f32 {
    let progress = progress.clamp(0.0, 1.0);
    let amount = if progress < POP_RAMP {
        ease_out_cubic(progress / POP_RAMP)
    } else if progress > 1.0 - POP_RAMP {
        ease_out_cubic((1.0 - progress) / POP_RAMP)
    } else {
        1.0
    };
    1.0 + (peak - 1.0) * amount as f32
}

/// Highlight box motion between words.
///
/// Retargeting mid-slide starts the new slide from wherever the box
/// currently is.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideTransitionState {
    from: Rect,
    to: Rect,
    start: f64,
    duration: f64,
    target: Option<usize>,
}

impl SlideTransitionState {
    /// Resting at `rect`.
    pub fn at(rect: Rect) -> Self {
        Self {
            from: rect,
            to: rect,
            start: 0.0,
            duration: 0.0,
            target: None,
        }
    }

    /// Word index the box is moving to (or resting on).
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// Start sliding towards `rect` at time `now`, unless already heading to `word`.
    pub fn retarget(&mut self, word: usize, rect: Rect, now: f64, duration: f64) {
        if self.target == Some(word) {
            self.to = rect;
            return;
        }
        self.from = self.current(now);
        self.to = rect;
        self.start = now;
        self.duration = duration.max(0.0);
        self.target = Some(word);
    }

    /// Box position at time `t`.
    pub fn current(&self, t: f64) -> Rect {
        let progress = animation_progress(t, self.start, self.start + self.duration);
        self.from.lerp(&self.to, ease_out_cubic(progress) as f32)
    }

    pub fn is_settled(&self, t: f64) -> bool {
        t >= self.start + self.duration
    }
}
