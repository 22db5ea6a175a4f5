//! Word-level timings for animated subtitles.

use serde::{Deserialize, Serialize};
use subforge_common::error::{SubforgeError, SubforgeResult};

use crate::cue::{display_end, Cue, OPEN_END_FALLBACK_SECS};

/// A single timed word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordChunk {
    pub text: String,

    /// `[start, end]` in seconds; a missing end runs until the next word.
    pub timestamp: (f64, Option<f64>),
}

impl WordChunk {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            timestamp: (start, Some(end)),
        }
    }

    pub fn open(text: impl Into<String>, start: f64) -> Self {
        Self {
            text: text.into(),
            timestamp: (start, None),
        }
    }

    pub fn start(&self) -> f64 {
        self.timestamp.0
    }

    pub fn end(&self) -> Option<f64> {
        self.timestamp.1
    }
}

/// Inclusive `[first, last]` word indices belonging to one cue.
pub type WordRange = (usize, usize);

/// All word chunks of a transcript plus their per-cue grouping.
///
/// `cue_ranges[i]` is the range of `chunks` shown by cue `i`, or `None`
/// when the cue has no words (it is then rendered as plain text).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordAnimationData {
    pub chunks: Vec<WordChunk>,
    pub cue_ranges: Vec<Option<WordRange>>,
}

impl WordAnimationData {
    /// Group `words` under `cues` by start-time containment.
    ///
    /// A word belongs to the first cue whose display interval contains its
    /// start. Words falling outside every cue are kept in `chunks` but belong
    /// to no range.
    pub fn group(cues: &[Cue], words: Vec<WordChunk>) -> Self {
        let mut cue_ranges = Vec::with_capacity(cues.len());
        let mut cursor = 0;

        for (i, cue) in cues.iter().enumerate() {
            let start = cue.start();
            let end = display_end(cues, i);

            while cursor < words.len() && words[cursor].start() < start {
                cursor += 1;
            }
            let first = cursor;
            while cursor < words.len() && words[cursor].start() < end {
                cursor += 1;
            }
            cue_ranges.push(if cursor > first {
                Some((first, cursor - 1))
            } else {
                None
            });
        }

        Self {
            chunks: words,
            cue_ranges,
        }
    }

    /// Word range of cue `cue_index`, if any.
    pub fn range_for(&self, cue_index: usize) -> Option<WordRange> {
        self.cue_ranges.get(cue_index).copied().flatten()
    }

    /// Words of cue `cue_index`, or an empty slice.
    pub fn words_for(&self, cue_index: usize) -> &[WordChunk] {
        match self.range_for(cue_index) {
            Some((first, last)) if last < self.chunks.len() && first <= last => {
                &self.chunks[first..=last]
            }
            _ => &[],
        }
    }

    /// End time of word `index` within `words`.
    ///
    /// A missing end becomes the next word's start, or start + 0.5s.
    pub fn word_end(words: &[WordChunk], index: usize) -> f64 {
        let word = &words[index];
        match word.end() {
            Some(end) => end,
            None => words
                .get(index + 1)
                .map(WordChunk::start)
                .unwrap_or(word.start() + OPEN_END_FALLBACK_SECS),
        }
    }

    /// Check that every range is in bounds, ordered and non-overlapping.
    pub fn validate(&self) -> SubforgeResult<()> {
        let mut previous_last: Option<usize> = None;
        for (cue, range) in self.cue_ranges.iter().enumerate() {
            let Some((first, last)) = *range else {
                continue;
            };
            if first > last || last >= self.chunks.len() {
                return Err(SubforgeError::cue(format!(
                    "word range [{first}, {last}] of cue {cue} is out of bounds for {} words",
                    self.chunks.len()
                )));
            }
            if previous_last.is_some_and(|prev| first <= prev) {
                return Err(SubforgeError::cue(format!(
                    "word range [{first}, {last}] of cue {cue} overlaps the previous cue"
                )));
            }
            let words = &self.chunks[first..=last];
            if words.windows(2).any(|w| w[1].start() < w[0].start()) {
                return Err(SubforgeError::cue(format!(
                    "words of cue {cue} are not in timestamp order"
                )));
            }
            previous_last = Some(last);
        }
        Ok(())
    }
}
