//! Encoder selection: mirror the source codec when the platform can encode
//! it, otherwise fall back to a Constrained Baseline H.264 level sized to the
//! frame.

use subforge_common::error::{SubforgeError, SubforgeResult};

use crate::codec::{CodecPlatform, VideoDecoderConfig, VideoEncoderConfig};
use crate::demux::Metadata;

/// Bitrate used when the source does not report a usable one.
pub const DEFAULT_BITRATE: u64 = 8_000_000;

/// (max macroblocks per frame, codec string), ascending.
const AVC_LEVELS: &[(u32, &str)] = &[
    (99, "avc1.42E00A"),
    (396, "avc1.42E014"),
    (792, "avc1.42E015"),
    (1620, "avc1.42E01E"),
    (3600, "avc1.42E01F"),
    (5120, "avc1.42E020"),
    (8192, "avc1.42E028"),
    (8704, "avc1.42E02A"),
    (22080, "avc1.42E032"),
    (36864, "avc1.42E033"),
];

/// Round a reported bitrate, or use `default` if it is missing, non-positive
/// or not finite.
pub fn sanitize_bitrate(bitrate: Option<f64>, default: u64) -> u64 {
    match bitrate {
        Some(b) if b.is_finite() && b > 0.0 => (b.round() as u64).max(1),
        _ => default,
    }
}

/// 16x16 macroblocks needed to cover a frame.
pub fn macroblocks(width: u32, height: u32) -> u64 {
    u64::from(width.div_ceil(16)) * u64::from(height.div_ceil(16))
}

/// Smallest H.264 level string able to hold a `width` x `height` frame.
pub fn fallback_codec(width: u32, height: u32) -> SubforgeResult<&'static str> {
    let mbs = macroblocks(width, height);
    AVC_LEVELS
        .iter()
        .find(|(max, _)| mbs <= u64::from(*max))
        .map(|(_, codec)| *codec)
        .ok_or_else(|| {
            SubforgeError::negotiation(format!(
                "resolution not supported: {width}x{height} ({mbs} macroblocks)"
            ))
        })
}

/// Encoder config mirroring the source codec and resolution.
pub fn mirror_candidate(
    decoder: &VideoDecoderConfig,
    metadata: &Metadata,
    default_bitrate: u64,
) -> VideoEncoderConfig {
    let framerate = (metadata.sample_count > 0 && metadata.duration > 0.0)
        .then(|| metadata.sample_count as f64 / metadata.duration);
    VideoEncoderConfig {
        codec: decoder.codec.clone(),
        width: decoder.coded_width,
        height: decoder.coded_height,
        bitrate: sanitize_bitrate(metadata.bitrate, default_bitrate),
        framerate,
    }
}

/// Pick the encoder configuration for a render.
pub async fn negotiate(
    decoder: &VideoDecoderConfig,
    metadata: &Metadata,
    platform: &dyn CodecPlatform,
    default_bitrate: u64,
) -> SubforgeResult<VideoEncoderConfig> {
    let candidate = mirror_candidate(decoder, metadata, default_bitrate);
    if platform.is_encoder_supported(&candidate).await {
        tracing::info!(
            platform = platform.name(),
            codec = %candidate.codec,
            bitrate = candidate.bitrate,
            "Encoding with source codec"
        );
        return Ok(candidate);
    }

    let fallback = fallback_codec(candidate.width, candidate.height)?;
    tracing::info!(
        platform = platform.name(),
        source = %candidate.codec,
        fallback,
        "Source codec not encodable, falling back to H.264"
    );
    Ok(VideoEncoderConfig {
        codec: fallback.to_string(),
        ..candidate
    })
}
