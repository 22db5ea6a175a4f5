//! Codec types and the platform codec interface.
//!
//! The shapes mirror the browser WebCodecs API: decoders take
//! [`EncodedVideoChunk`]s and emit [`VideoFrame`]s, encoders take frames and
//! emit [`EncodedOutput`]s. Output is pulled with awaited calls instead of
//! callbacks, so the pipeline can treat each codec as an explicit state
//! machine.
//!
//! Implementations of `next_frame` / `next_chunk` must be cancel safe: the
//! pipeline races them against each other and drops the loser.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use subforge_common::error::SubforgeResult;

/// Whether a chunk can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Key,
    Delta,
}

/// Configuration for a video decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    /// Codec string, e.g. `avc1.64001F`.
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Codec configuration record (avcC/hvcC/vpcC/av1C payload).
    pub description: Option<Bytes>,
}

/// Configuration of the source audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    pub description: Option<Bytes>,
    /// The complete sample-entry box from the source, copied into the output.
    pub sample_entry: Bytes,
}

/// Configuration for a video encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    pub framerate: Option<f64>,
}

/// One compressed video access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideoChunk {
    pub kind: ChunkKind,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub data: Bytes,
}

/// One compressed audio sample, forwarded without decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudioChunk {
    pub data: Bytes,
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// A decoded picture in tightly packed RGBA8.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// A transparent black frame.
    pub fn blank(width: u32, height: u32, timestamp_us: i64, duration_us: i64) -> Self {
        Self {
            timestamp_us,
            duration_us,
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wrap RGBA bytes; `None` if the buffer size does not match.
    pub fn from_rgba(
        width: u32,
        height: u32,
        timestamp_us: i64,
        duration_us: i64,
        data: Vec<u8>,
    ) -> Option<Self> {
        (data.len() == width as usize * height as usize * 4).then_some(Self {
            timestamp_us,
            duration_us,
            width,
            height,
            data,
        })
    }

    /// Timestamp in seconds, the unit cues are expressed in.
    pub fn timestamp_secs(&self) -> f64 {
        subforge_common::timebase::micros_to_secs(self.timestamp_us)
    }

    /// RGBA of the pixel at (x, y), if in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ])
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("timestamp_us", &self.timestamp_us)
            .field("duration_us", &self.duration_us)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Encoder output: the chunk plus, on the first output, the decoder
/// configuration the muxer needs to describe the track.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub chunk: EncodedVideoChunk,
    pub metadata: Option<VideoDecoderConfig>,
}

/// Per-frame encode options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub key_frame: bool,
}

/// A configured video decoder.
#[async_trait]
pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &VideoDecoderConfig) -> SubforgeResult<()>;

    /// Submit a chunk. Must not block waiting for output.
    fn decode(&mut self, chunk: EncodedVideoChunk) -> SubforgeResult<()>;

    /// Chunks submitted whose frames have not yet been returned.
    fn decode_queue_size(&self) -> usize;

    /// Wait for the next decoded frame. `None` means the decoder has no
    /// pending work.
    async fn next_frame(&mut self) -> SubforgeResult<Option<VideoFrame>>;

    /// Finish all pending work and return the remaining frames in order.
    async fn flush(&mut self) -> SubforgeResult<Vec<VideoFrame>>;
}

/// A configured video encoder.
#[async_trait]
pub trait VideoEncoder: Send {
    fn configure(&mut self, config: &VideoEncoderConfig) -> SubforgeResult<()>;

    fn encode(&mut self, frame: VideoFrame, options: EncodeOptions) -> SubforgeResult<()>;

    /// Frames submitted whose chunks have not yet been returned.
    fn encode_queue_size(&self) -> usize;

    async fn next_chunk(&mut self) -> SubforgeResult<Option<EncodedOutput>>;

    async fn flush(&mut self) -> SubforgeResult<Vec<EncodedOutput>>;
}

/// Codec capabilities of the host.
#[async_trait]
pub trait CodecPlatform: Send + Sync {
    /// Platform name for logs.
    fn name(&self) -> &str;

    async fn is_decoder_supported(&self, config: &VideoDecoderConfig) -> bool;

    async fn is_encoder_supported(&self, config: &VideoEncoderConfig) -> bool;

    fn create_decoder(&self) -> SubforgeResult<Box<dyn VideoDecoder>>;

    fn create_encoder(&self) -> SubforgeResult<Box<dyn VideoEncoder>>;
}
