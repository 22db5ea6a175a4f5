//! Active cue and active word lookup by presentation time.

use subforge_cue_model::{display_end, Cue, WordAnimationData, WordChunk};

/// Whether cue `index` is on screen at `t` seconds.
///
/// A cue without an end is shown until the next cue starts, or forever if it
/// is the last one.
pub fn is_displayed(t: f64, cues: &[Cue], index: usize) -> bool {
    match cues.get(index) {
        Some(cue) => t >= cue.start() && t < display_end(cues, index),
        None => false,
    }
}

/// Index of the cue displayed at `t`.
///
/// `previous` is the last resolved index. It is re-checked first, then its
/// successor, before falling back to a scan from the start, so monotonic
/// playback resolves in constant time per frame.
pub fn resolve(t: f64, cues: &[Cue], previous: Option<usize>) -> Option<usize> {
    if let Some(prev) = previous {
        if is_displayed(t, cues, prev) {
            return Some(prev);
        }
        if is_displayed(t, cues, prev + 1) {
            return Some(prev + 1);
        }
    }
    (0..cues.len()).find(|&i| is_displayed(t, cues, i))
}

/// Remembers the last resolved cue across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct CueCursor {
    last: Option<usize>,
}

impl CueCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, t: f64, cues: &[Cue]) -> Option<usize> {
        let found = resolve(t, cues, self.last);
        if found.is_some() {
            self.last = found;
        }
        found
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Index into `words` of the word spoken at `t`, using `[start, end)`.
pub fn active_word(t: f64, words: &[WordChunk]) -> Option<usize> {
    (0..words.len()).find(|&i| {
        let start = words[i].start();
        t >= start && t < WordAnimationData::word_end(words, i)
    })
}

/// Linear progress of `t` through `[start, end]`, clamped to `[0, 1]`.
pub fn animation_progress(t: f64, start: f64, end: f64) -> f64 {
    let duration = end - start;
    if duration <= 0.0 {
        return 1.0;
    }
    ((t - start) / duration).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues() -> Vec<Cue> {
        vec![
            Cue::new("a", 0.0, 1.0),
            Cue::open("b", 2.0),
            Cue::new("c", 3.0, 4.0),
            Cue::open("d", 5.0),
        ]
    }

    #[test]
    fn test_closed_cue_bounds() {
        let cues = cues();
        assert_eq!(resolve(0.0, &cues, None), Some(0));
        assert_eq!(resolve(0.999, &cues, None), Some(0));
        assert_eq!(resolve(1.0, &cues, None), None);
        assert_eq!(resolve(1.5, &cues, None), None);
    }

    #[test]
    fn test_open_cue_runs_until_next_start() {
        let cues = cues();
        assert_eq!(resolve(2.0, &cues, None), Some(1));
        assert_eq!(resolve(2.99, &cues, None), Some(1));
        assert_eq!(resolve(3.0, &cues, None), Some(2));
    }

    #[test]
    fn test_last_open_cue_never_ends() {
        let cues = cues();
        assert_eq!(resolve(5.0, &cues, None), Some(3));
        assert_eq!(resolve(1e6, &cues, None), Some(3));
    }

    #[test]
    fn test_before_first_and_empty() {
        assert_eq!(resolve(-0.1, &cues(), None), None);
        assert_eq!(resolve(1.0, &[], None), None);
        assert_eq!(resolve(1.0, &[], Some(3)), None);
    }

    #[test]
    fn test_stale_previous_falls_back_to_scan() {
        let cues = cues();
        assert_eq!(resolve(0.5, &cues, Some(3)), Some(0));
        assert_eq!(resolve(3.5, &cues, Some(9)), Some(2));
    }

    #[test]
    fn test_overlap_keeps_previous() {
        // "b" closes at 2.0 but "c" starts at 1.5: both shown on [1.5, 2.0).
        let cues = vec![
            Cue::new("a", 0.0, 1.0),
            Cue::new("b", 1.0, 2.0),
            Cue::new("c", 1.5, 3.0),
        ];
        assert_eq!(resolve(1.7, &cues, Some(1)), Some(1));
        assert_eq!(resolve(1.7, &cues, None), Some(1));
        assert_eq!(resolve(2.1, &cues, Some(1)), Some(2));
    }

    #[test]
    fn test_cursor_tracks_playback() {
        let cues = cues();
        let mut cursor = CueCursor::new();
        assert_eq!(cursor.resolve(0.2, &cues), Some(0));
        assert_eq!(cursor.resolve(1.5, &cues), None);
        assert_eq!(cursor.last(), Some(0));
        assert_eq!(cursor.resolve(2.5, &cues), Some(1));
        cursor.reset();
        assert_eq!(cursor.last(), None);
    }

    #[test]
    fn test_active_word() {
        let words = vec![
            WordChunk::new("one", 0.0, 0.4),
            WordChunk::open("two", 0.5),
            WordChunk::open("three", 1.0),
        ];
        assert_eq!(active_word(0.0, &words), Some(0));
        assert_eq!(active_word(0.45, &words), None);
        assert_eq!(active_word(0.7, &words), Some(1));
        assert_eq!(active_word(1.0, &words), Some(2));
        assert_eq!(active_word(1.49, &words), Some(2));
        assert_eq!(active_word(1.5, &words), None);
    }

    #[test]
    fn test_animation_progress_bounds() {
        assert_eq!(animation_progress(1.0, 1.0, 2.0), 0.0);
        assert_eq!(animation_progress(2.0, 1.0, 2.0), 1.0);
        assert_eq!(animation_progress(1.5, 1.0, 2.0), 0.5);
        assert_eq!(animation_progress(0.0, 1.0, 2.0), 0.0);
        assert_eq!(animation_progress(9.0, 1.0, 2.0), 1.0);
        assert_eq!(animation_progress(1.0, 2.0, 2.0), 1.0);
        assert_eq!(animation_progress(1.0, 2.0, 1.0), 1.0);
    }
}
