//! Subforge Render Engine
//!
//! Burns subtitle cues into a video, frame by frame, entirely locally.
//!
//! # Pipeline Architecture
//!
//! ```text
//! input.mp4 ── Demuxer ──┬── video chunks ── FIFO (bounded) ── Decoder
//!                        │                                        │
//!                        │                     cues ── Cue Index ─┤
//!                        │                                        ▼
//!                        │                              Overlay Renderer
//!                        │                                        │
//!                        │                                     Encoder
//!                        │                                        │
//!                        └── audio chunks (passthrough) ──────► Muxer ── Target
//! ```
//!
//! The codec negotiator picks the encoder once, before streaming starts.
//! Codecs come from a [`codec::CodecPlatform`]; the `gstreamer` feature
//! provides one backed by GStreamer.

pub mod codec;
pub mod cue_index;
pub mod demux;
pub mod mp4;
pub mod negotiate;
pub mod overlay;
pub mod pipeline;
#[cfg(feature = "gstreamer")]
pub mod platform;
pub mod target;
pub mod worker;

pub use codec::*;
pub use pipeline::{
    PipelineState, PipelineStats, ProgressCallback, ProgressKind, RenderOutput, RenderPipeline,
    RenderProgress, RenderRequest, ValidationReport,
};
pub use target::Target;
pub use worker::{RenderWorker, WorkerMessage, WorkerRequest};
