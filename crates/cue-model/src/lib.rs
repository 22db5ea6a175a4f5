//! Subforge Cue Model
//!
//! Defines the data contracts shared by the cue editor, the style editor and
//! the render pipeline:
//! - **Cues:** Timed subtitle text with optional open-ended display
//! - **Words:** Per-word timings grouped into inclusive ranges per cue
//! - **Style:** The immutable render style snapshot and its reducer-driven store
//! - **Transcripts:** Messages emitted by the speech-recognition worker
//! - **Subtitles:** SRT and WebVTT import/export
//!
//! All times are fractional seconds from the start of the video. All style
//! coordinates are in output-video pixels.

pub mod cue;
pub mod store;
pub mod style;
pub mod subtitles;
pub mod transcript;
pub mod word;

pub use cue::*;
pub use store::*;
pub use style::*;
pub use transcript::*;
pub use word::*;
