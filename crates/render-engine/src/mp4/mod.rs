//! Minimal ISO-BMFF (MP4) support: enough to read progressive files and to
//! write a re-encoded video track next to a passthrough audio track.

pub mod boxes;
pub mod codec_string;
pub mod parse;
pub mod writer;

pub use parse::{MovieInfo, SampleEntry, SampleInfo, TrackInfo, TrackKind};
pub use writer::{Mp4Muxer, VIDEO_TIMESCALE};
