//! Subtitle cues.
//!
//! A cue is serialized the way the editor and the transcription worker
//! exchange it: `{"id": 3, "text": "hello", "timestamp": [1.0, 2.5]}`, where
//! the end may be `null`.

use serde::{Deserialize, Serialize};
use subforge_common::error::{SubforgeError, SubforgeResult};

/// Fallback length of an open-ended cue with no successor, in seconds.
pub const OPEN_END_FALLBACK_SECS: f64 = 0.5;

/// One timed subtitle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Optional editor-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Text shown while the cue is active. `\n` forces a line break.
    pub text: String,

    /// `[start, end]` in seconds; a missing end runs until the next cue.
    pub timestamp: (f64, Option<f64>),
}

impl Cue {
    /// Create a cue with a closed interval.
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            id: None,
            text: text.into(),
            timestamp: (start, Some(end)),
        }
    }

    /// Create a cue whose end is defined by the following cue.
    pub fn open(text: impl Into<String>, start: f64) -> Self {
        Self {
            id: None,
            text: text.into(),
            timestamp: (start, None),
        }
    }

    /// Attach an identifier.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn start(&self) -> f64 {
        self.timestamp.0
    }

    pub fn end(&self) -> Option<f64> {
        self.timestamp.1
    }

    /// Check the cue's own interval.
    pub fn validate(&self) -> SubforgeResult<()> {
        let (start, end) = self.timestamp;
        if !start.is_finite() || start < 0.0 {
            return Err(SubforgeError::cue(format!(
                "cue {:?} has invalid start {start}",
                self.text
            )));
        }
        if let Some(end) = end {
            if !end.is_finite() || end < start {
                return Err(SubforgeError::cue(format!(
                    "cue {:?} ends at {end} before it starts at {start}",
                    self.text
                )));
            }
        }
        Ok(())
    }
}

/// Validate a cue list: every interval is well formed and starts ascend.
pub fn validate_cues(cues: &[Cue]) -> SubforgeResult<()> {
    for cue in cues {
        cue.validate()?;
    }
    if let Some(pair) = cues.windows(2).find(|w| w[1].start() < w[0].start()) {
        return Err(SubforgeError::cue(format!(
            "cues out of order: {:?} at {} follows {:?} at {}",
            pair[1].text,
            pair[1].start(),
            pair[0].text,
            pair[0].start()
        )));
    }
    Ok(())
}

/// Sort cues ascending by start time, keeping the order of equal starts.
pub fn sort_cues(cues: &mut [Cue]) {
    cues.sort_by(|a, b| a.start().total_cmp(&b.start()));
}

/// End time used when exporting cue `index` to a subtitle file.
///
/// An open end becomes the next cue's start, or start + 0.5s for the last cue.
pub fn export_end(cues: &[Cue], index: usize) -> f64 {
    let cue = &cues[index];
    match cue.end() {
        Some(end) => end,
        None => cues
            .get(index + 1)
            .map(Cue::start)
            .unwrap_or(cue.start() + OPEN_END_FALLBACK_SECS),
    }
}

/// End of the interval during which cue `index` is displayed.
///
/// An open end lasts until the next cue's start, or forever for the last cue.
pub fn display_end(cues: &[Cue], index: usize) -> f64 {
    let cue = &cues[index];
    match cue.end() {
        Some(end) => end,
        None => cues
            .get(index + 1)
            .map(Cue::start)
            .unwrap_or(f64::INFINITY),
    }
}

/// Parse a JSON cue list.
///
/// Accepts either a bare array of cues or an object with a `chunks` array,
/// which is the shape the transcription worker emits.
pub fn parse_cues_json(json: &str) -> SubforgeResult<Vec<Cue>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CueFile {
        List(Vec<Cue>),
        Chunks { chunks: Vec<Cue> },
    }

    let cues = match serde_json::from_str::<CueFile>(json)? {
        CueFile::List(cues) => cues,
        CueFile::Chunks { chunks } => chunks,
    };
    validate_cues(&cues)?;
    Ok(cues)
}
