//! Decode, overlay, encode and mux pipeline.
//!
//! One [`RenderPipeline::render`] call drives a single render as an explicit
//! state machine:
//!
//! ```text
//! Idle -> Configuring -> Streaming -> Draining -> Finalizing -> Done
//!                  \___________\___________\____________\-----> Error
//! ```
//!
//! Video chunks from the demuxer collect in a FIFO and reach the decoder in
//! batches of at most `queue_size`, and only while the encoder has nothing
//! pending. The decoder never holds more than `queue_size` chunks.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use subforge_common::config::RenderDefaults;
use subforge_common::error::{SubforgeError, SubforgeResult};
use subforge_cue_model::{validate_cues, Cue, RenderStyle, WordAnimationData};

use crate::codec::{
    CodecPlatform, EncodeOptions, EncodedOutput, EncodedVideoChunk, VideoDecoder, VideoEncoder,
    VideoEncoderConfig, VideoFrame,
};
use crate::demux::{DemuxEvent, Demuxer};
use crate::mp4::Mp4Muxer;
use crate::negotiate::{mirror_candidate, negotiate};
use crate::overlay::{RasterizerFactory, RendererContext};
use crate::target::{suggested_filename, MuxSink, Target};

/// Progress callback for renders.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send + Sync>;

/// Which counter a progress report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A frame was decoded and overlaid.
    Render,
    /// A chunk was encoded and muxed.
    Encode,
}

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    pub kind: ProgressKind,
    pub processed: u64,
    pub total: u64,
    /// `processed / total * 100`.
    pub percent: f64,
}

impl RenderProgress {
    fn new(kind: ProgressKind, processed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        Self {
            kind,
            processed,
            total,
            percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Configuring,
    Streaming,
    Draining,
    Finalizing,
    Done,
    Error,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything one render needs. Cues and style are snapshots.
#[derive(Debug)]
pub struct RenderRequest {
    pub source: PathBuf,
    pub cues: Vec<Cue>,
    /// `None` uses [`RenderStyle::default_for`] the source size.
    pub style: Option<RenderStyle>,
    pub word_animation: Option<WordAnimationData>,
    pub target: Target,
}

/// Counters collected during a render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub video_samples: u64,
    pub frames_decoded: u64,
    pub chunks_encoded: u64,
    pub audio_chunks: u64,
    /// Times a batch of chunks was handed to the decoder.
    pub decode_batches: u64,
    /// Largest decoder queue observed right after a batch.
    pub max_decode_queue: usize,
    pub elapsed_secs: f64,
}

/// Result of a finished render.
#[derive(Debug)]
pub struct RenderOutput {
    pub target: Target,
    pub encoder: VideoEncoderConfig,
    pub stats: PipelineStats,
}

/// Pre-flight codec support for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub source_codec: String,
    pub width: u32,
    pub height: u32,
    pub decoder_supported: bool,
    pub encoder_supported: bool,
}

/// The render pipeline and its collaborators.
pub struct RenderPipeline {
    platform: Arc<dyn CodecPlatform>,
    fonts: Arc<dyn RasterizerFactory>,
    settings: RenderDefaults,
}

impl RenderPipeline {
    pub fn new(
        platform: Arc<dyn CodecPlatform>,
        fonts: Arc<dyn RasterizerFactory>,
        settings: RenderDefaults,
    ) -> Self {
        Self {
            platform,
            fonts,
            settings,
        }
    }

    pub fn platform(&self) -> &dyn CodecPlatform {
        self.platform.as_ref()
    }

    /// Check whether the source can be decoded and re-encoded with its own
    /// codec, without creating any codec.
    pub async fn validate(&self, source: &Path) -> SubforgeResult<ValidationReport> {
        let demuxer = Demuxer::open(source, self.settings.read_chunk_bytes)?;
        let config = demuxer.config();
        let decoder_supported = self.platform.is_decoder_supported(&config.video).await;
        let candidate = mirror_candidate(
            &config.video,
            &config.metadata,
            self.settings.default_bitrate,
        );
        let encoder_supported = self.platform.is_encoder_supported(&candidate).await;

        tracing::info!(
            source = %source.display(),
            codec = %config.video.codec,
            decoder_supported,
            encoder_supported,
            "Validated source"
        );
        Ok(ValidationReport {
            source_codec: config.video.codec.clone(),
            width: config.video.coded_width,
            height: config.video.coded_height,
            decoder_supported,
            encoder_supported,
        })
    }

    /// Render `request` to its target.
    pub async fn render(
        &self,
        request: RenderRequest,
        progress: Option<ProgressCallback>,
    ) -> SubforgeResult<RenderOutput> {
        let mut run = Run {
            state: PipelineState::Idle,
            progress,
            stats: PipelineStats::default(),
        };
        let started = Instant::now();
        tracing::info!(
            source = %request.source.display(),
            cues = request.cues.len(),
            target = request.target.kind(),
            platform = self.platform.name(),
            "Starting render"
        );

        match self.run(&mut run, request).await {
            Ok((target, encoder)) => {
                run.stats.elapsed_secs = started.elapsed().as_secs_f64();
                run.transition(PipelineState::Done);
                tracing::info!(
                    frames = run.stats.frames_decoded,
                    chunks = run.stats.chunks_encoded,
                    batches = run.stats.decode_batches,
                    elapsed_secs = run.stats.elapsed_secs,
                    "Render complete"
                );
                Ok(RenderOutput {
                    target,
                    encoder,
                    stats: run.stats,
                })
            }
            Err(e) => {
                run.transition(PipelineState::Error);
                tracing::error!(stage = e.stage(), error = %e, "Render failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        run: &mut Run,
        request: RenderRequest,
    ) -> SubforgeResult<(Target, VideoEncoderConfig)> {
        let RenderRequest {
            source,
            cues,
            style,
            word_animation,
            target,
        } = request;
        validate_cues(&cues)?;
        if let Some(words) = &word_animation {
            words.validate()?;
        }

        let mut demuxer = Demuxer::open(&source, self.settings.read_chunk_bytes)?;
        let config = match demuxer.next_event()? {
            Some(DemuxEvent::Config(config)) => config,
            _ => return Err(SubforgeError::demux("source produced no track configuration")),
        };

        run.transition(PipelineState::Configuring);
        let encoder_config = negotiate(
            &config.video,
            &config.metadata,
            self.platform.as_ref(),
            self.settings.default_bitrate,
        )
        .await?;

        let style = match style {
            Some(style) => style,
            None => RenderStyle::default_for(config.video.coded_width, config.video.coded_height),
        };
        style.validate()?;
        let rasterizer = self.fonts.create(&style)?;
        let mut renderer = RendererContext::new(&config.video, rasterizer, style, word_animation);

        let mut decoder = self.platform.create_decoder()?;
        decoder.configure(&config.video)?;
        let mut encoder = self.platform.create_encoder()?;
        encoder.configure(&encoder_config)?;

        let sink = target.into_sink(suggested_filename(&source))?;
        let mut muxer = Mp4Muxer::new(sink, encoder_config.width, encoder_config.height)?;
        if let Some(audio) = &config.audio {
            muxer.add_audio_track(audio);
        }

        run.stats.video_samples = config.metadata.sample_count;
        let mut stream = Stream {
            decoder: decoder.as_mut(),
            encoder: encoder.as_mut(),
            renderer: &mut renderer,
            muxer: &mut muxer,
            cues: &cues,
            keyframe_interval: self.settings.keyframe_interval.max(1),
        };

        run.transition(PipelineState::Streaming);
        let queue_size = self.settings.queue_size.max(1);
        let mut buffer: VecDeque<EncodedVideoChunk> = VecDeque::with_capacity(queue_size);
        let mut source_done = false;

        loop {
            while !source_done && buffer.len() < queue_size {
                match demuxer.next_event()? {
                    Some(DemuxEvent::VideoChunk(chunk)) => buffer.push_back(chunk),
                    Some(DemuxEvent::AudioChunk(chunk)) => {
                        stream.muxer.add_audio_chunk(&chunk)?;
                        run.stats.audio_chunks += 1;
                    }
                    Some(DemuxEvent::Config(_)) => {}
                    None => source_done = true,
                }
            }

            if stream.encoder.encode_queue_size() == 0 && !buffer.is_empty() {
                let room = queue_size.saturating_sub(stream.decoder.decode_queue_size());
                let count = room.min(buffer.len());
                if count > 0 {
                    for chunk in buffer.drain(..count) {
                        stream.decoder.decode(chunk)?;
                    }
                    let in_flight = stream.decoder.decode_queue_size();
                    run.stats.decode_batches += 1;
                    run.stats.max_decode_queue = run.stats.max_decode_queue.max(in_flight);
                    tracing::debug!(count, in_flight, buffered = buffer.len(), "Fed decoder");
                }
            }

            if source_done && buffer.is_empty() && stream.encoder.encode_queue_size() == 0 {
                break;
            }

            let decoding = stream.decoder.decode_queue_size() > 0;
            let encoding = stream.encoder.encode_queue_size() > 0;
            if !decoding && !encoding {
                continue;
            }

            let step = tokio::select! {
                biased;
                out = stream.encoder.next_chunk(), if encoding => Step::Chunk(out?),
                frame = stream.decoder.next_frame(), if decoding => Step::Frame(frame?),
            };
            match step {
                Step::Frame(Some(frame)) => stream.process_frame(run, frame)?,
                Step::Chunk(Some(out)) => stream.mux_chunk(run, out)?,
                Step::Frame(None) => {
                    return Err(SubforgeError::codec("decoder stalled with chunks pending"))
                }
                Step::Chunk(None) => {
                    return Err(SubforgeError::codec("encoder stalled with frames pending"))
                }
            }
        }

        run.transition(PipelineState::Draining);
        for frame in stream.decoder.flush().await? {
            stream.process_frame(run, frame)?;
        }

        run.transition(PipelineState::Finalizing);
        for out in stream.encoder.flush().await? {
            stream.mux_chunk(run, out)?;
        }
        drop(stream);

        let sink: MuxSink = muxer.finalize()?;
        let target = sink.finish()?;
        Ok((target, encoder_config))
    }
}

enum Step {
    Frame(Option<VideoFrame>),
    Chunk(Option<EncodedOutput>),
}

struct Run {
    state: PipelineState,
    progress: Option<ProgressCallback>,
    stats: PipelineStats,
}

impl Run {
    fn transition(&mut self, next: PipelineState) {
        tracing::info!(from = %self.state, to = %next, "Pipeline state");
        self.state = next;
    }

    fn report(&self, kind: ProgressKind, processed: u64) {
        if let Some(cb) = &self.progress {
            cb(RenderProgress::new(kind, processed, self.stats.video_samples));
        }
    }
}

/// Borrowed per-render stages.
struct Stream<'a> {
    decoder: &'a mut dyn VideoDecoder,
    encoder: &'a mut dyn VideoEncoder,
    renderer: &'a mut RendererContext,
    muxer: &'a mut Mp4Muxer<MuxSink>,
    cues: &'a [Cue],
    keyframe_interval: u64,
}

impl Stream<'_> {
    fn process_frame(&mut self, run: &mut Run, frame: VideoFrame) -> SubforgeResult<()> {
        let index = run.stats.frames_decoded;
        run.stats.frames_decoded += 1;
        run.report(ProgressKind::Render, run.stats.frames_decoded);

        let frame = self.renderer.render_cue(self.cues, frame)?;
        let key_frame = index % self.keyframe_interval == 0;
        self.encoder.encode(frame, EncodeOptions { key_frame })
    }

    fn mux_chunk(&mut self, run: &mut Run, out: EncodedOutput) -> SubforgeResult<()> {
        self.muxer
            .add_video_chunk(&out.chunk, out.metadata.as_ref())?;
        run.stats.chunks_encoded += 1;
        run.report(ProgressKind::Encode, run.stats.chunks_encoded);
        Ok(())
    }
}
