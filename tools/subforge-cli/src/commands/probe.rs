//! Show container and track information.

use std::path::PathBuf;

use subforge_common::config::AppConfig;
use subforge_render_engine::demux::{demux_file, DemuxHandler, Metadata};
use subforge_render_engine::negotiate::{fallback_codec, sanitize_bitrate};
use subforge_render_engine::{
    AudioDecoderConfig, ChunkKind, EncodedVideoChunk, VideoDecoderConfig,
};

#[derive(Default)]
struct Probe {
    video: Option<VideoDecoderConfig>,
    audio: Option<AudioDecoderConfig>,
    metadata: Option<Metadata>,
    video_chunks: u64,
    key_frames: u64,
    audio_chunks: u64,
    audio_bytes: u64,
}

impl DemuxHandler for Probe {
    fn on_config(
        &mut self,
        video: &VideoDecoderConfig,
        audio: Option<&AudioDecoderConfig>,
        metadata: &Metadata,
    ) {
        self.video = Some(video.clone());
        self.audio = audio.cloned();
        self.metadata = Some(metadata.clone());
    }

    fn on_video_chunk(&mut self, chunk: EncodedVideoChunk) {
        self.video_chunks += 1;
        if chunk.kind == ChunkKind::Key {
            self.key_frames += 1;
        }
    }

    fn on_raw_audio_chunk(
        &mut self,
        data: bytes::Bytes,
        _kind: ChunkKind,
        _timestamp_us: i64,
        _duration_us: i64,
    ) {
        self.audio_chunks += 1;
        self.audio_bytes += data.len() as u64;
    }

    fn on_status(&mut self, phase: &str, detail: &str) {
        tracing::debug!(phase, detail, "Demux status");
    }
}

pub fn run(config: &AppConfig, video: PathBuf) -> anyhow::Result<()> {
    let mut probe = Probe::default();
    demux_file(&video, config.render.read_chunk_bytes, &mut probe)
        .map_err(|e| anyhow::anyhow!("Failed to read video: {e}"))?;
    let (Some(info), Some(meta)) = (&probe.video, &probe.metadata) else {
        return Err(anyhow::anyhow!("Video produced no track configuration"));
    };

    println!("Video: {}", video.display());
    println!();

    println!("Video track:");
    println!("  Codec: {}", info.codec);
    println!("  Resolution: {}x{}", meta.width, meta.height);
    println!("  Duration: {:.3}s", meta.duration);
    println!("  Samples: {} ({} key frames)", probe.video_chunks, probe.key_frames);
    if meta.duration > 0.0 {
        println!("  Frame rate: {:.3} fps", meta.sample_count as f64 / meta.duration);
    }
    match meta.bitrate {
        Some(bps) => println!("  Bitrate: {:.0} kbps", bps / 1000.0),
        None => println!("  Bitrate: unknown"),
    }
    println!("  Timescale: {}", meta.timescale);
    println!(
        "  Description: {} bytes",
        info.description.as_ref().map_or(0, |d| d.len())
    );
    println!();

    match &probe.audio {
        Some(audio) => {
            println!("Audio track (passthrough):");
            println!("  Codec: {}", audio.codec);
            println!("  Sample rate: {} Hz", audio.sample_rate);
            println!("  Channels: {}", audio.number_of_channels);
            println!("  Samples: {} ({} bytes)", probe.audio_chunks, probe.audio_bytes);
        }
        None => println!("Audio track: none"),
    }
    println!();

    println!("Encoding:");
    println!(
        "  Bitrate: {} kbps",
        sanitize_bitrate(meta.bitrate, config.render.default_bitrate) / 1000
    );
    match fallback_codec(meta.width, meta.height) {
        Ok(codec) => println!("  H.264 fallback: {codec}"),
        Err(e) => println!("  H.264 fallback: {e}"),
    }

    Ok(())
}
