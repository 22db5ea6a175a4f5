#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use subforge_common::config::RenderDefaults;
use subforge_common::error::SubforgeResult;
use subforge_cue_model::{FontSpec, RenderStyle};
use subforge_render_engine::mp4::boxes::{write_box, write_full_box};
use subforge_render_engine::mp4::Mp4Muxer;
use subforge_render_engine::overlay::layer::TextPaint;
use subforge_render_engine::overlay::{RasterizerFactory, TextRasterizer};
use subforge_render_engine::{
    AudioDecoderConfig, ChunkKind, CodecPlatform, EncodeOptions, EncodedOutput,
    EncodedVideoChunk, RawAudioChunk, RenderPipeline, VideoDecoder, VideoDecoderConfig,
    VideoEncoder, VideoEncoderConfig, VideoFrame,
};

pub const AVCC: &[u8] = &[1, 0x42, 0xE0, 0x1E, 0xFF, 0xE0, 0x00];

/// Everything the fake codecs observed.
#[derive(Debug, Default)]
pub struct CodecLog {
    pub decoders_created: usize,
    pub encoders_created: usize,
    pub decoded: Vec<i64>,
    pub encoded: Vec<(i64, bool)>,
    pub decode_pending: usize,
    pub encode_pending: usize,
    pub max_decode_pending: usize,
    /// Chunks handed to the decoder while the encoder still had work.
    pub fed_while_encoding: usize,
    pub encoder_config: Option<VideoEncoderConfig>,
}

pub type SharedLog = Arc<Mutex<CodecLog>>;

pub struct FakeDecoder {
    log: SharedLog,
    size: (u32, u32),
    pending: VecDeque<EncodedVideoChunk>,
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    fn configure(&mut self, config: &VideoDecoderConfig) -> SubforgeResult<()> {
        self.size = (config.coded_width, config.coded_height);
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedVideoChunk) -> SubforgeResult<()> {
        self.pending.push_back(chunk);
        let mut log = self.log.lock().unwrap();
        if log.encode_pending > 0 {
            log.fed_while_encoding += 1;
        }
        log.decode_pending = self.pending.len();
        log.max_decode_pending = log.max_decode_pending.max(self.pending.len());
        Ok(())
    }

    fn decode_queue_size(&self) -> usize {
        self.pending.len()
    }

    async fn next_frame(&mut self) -> SubforgeResult<Option<VideoFrame>> {
        let Some(chunk) = self.pending.pop_front() else {
            return Ok(None);
        };
        let mut log = self.log.lock().unwrap();
        log.decoded.push(chunk.timestamp_us);
        log.decode_pending = self.pending.len();
        Ok(Some(VideoFrame::blank(
            self.size.0,
            self.size.1,
            chunk.timestamp_us,
            chunk.duration_us,
        )))
    }

    async fn flush(&mut self) -> SubforgeResult<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

pub struct FakeEncoder {
    log: SharedLog,
    config: Option<VideoEncoderConfig>,
    pending: VecDeque<(VideoFrame, bool)>,
    sent_metadata: bool,
}

#[async_trait]
impl VideoEncoder for FakeEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> SubforgeResult<()> {
        self.config = Some(config.clone());
        self.log.lock().unwrap().encoder_config = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, frame: VideoFrame, options: EncodeOptions) -> SubforgeResult<()> {
        self.pending.push_back((frame, options.key_frame));
        self.log.lock().unwrap().encode_pending = self.pending.len();
        Ok(())
    }

    fn encode_queue_size(&self) -> usize {
        self.pending.len()
    }

    async fn next_chunk(&mut self) -> SubforgeResult<Option<EncodedOutput>> {
        let Some((frame, key)) = self.pending.pop_front() else {
            return Ok(None);
        };
        {
            let mut log = self.log.lock().unwrap();
            log.encoded.push((frame.timestamp_us, key));
            log.encode_pending = self.pending.len();
        }
        let metadata = if self.sent_metadata {
            None
        } else {
            self.sent_metadata = true;
            let config = self.config.as_ref().unwrap();
            Some(VideoDecoderConfig {
                codec: "avc1.42E01E".into(),
                coded_width: config.width,
                coded_height: config.height,
                description: Some(Bytes::from_static(AVCC)),
            })
        };
        Ok(Some(EncodedOutput {
            chunk: EncodedVideoChunk {
                kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
                timestamp_us: frame.timestamp_us,
                duration_us: frame.duration_us,
                data: Bytes::from(frame.timestamp_us.to_be_bytes().to_vec()),
            },
            metadata,
        }))
    }

    async fn flush(&mut self) -> SubforgeResult<Vec<EncodedOutput>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.push(chunk);
        }
        Ok(out)
    }
}

/// Platform whose codecs pass frames straight through.
pub struct FakePlatform {
    pub log: SharedLog,
    pub decodable: bool,
    pub encodable: bool,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            log: SharedLog::default(),
            decodable: true,
            encodable: true,
        }
    }
}

#[async_trait]
impl CodecPlatform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_decoder_supported(&self, _config: &VideoDecoderConfig) -> bool {
        self.decodable
    }

    async fn is_encoder_supported(&self, config: &VideoEncoderConfig) -> bool {
        self.encodable && config.codec.starts_with("avc1")
    }

    fn create_decoder(&self) -> SubforgeResult<Box<dyn VideoDecoder>> {
        self.log.lock().unwrap().decoders_created += 1;
        Ok(Box::new(FakeDecoder {
            log: self.log.clone(),
            size: (0, 0),
            pending: VecDeque::new(),
        }))
    }

    fn create_encoder(&self) -> SubforgeResult<Box<dyn VideoEncoder>> {
        self.log.lock().unwrap().encoders_created += 1;
        Ok(Box::new(FakeEncoder {
            log: self.log.clone(),
            config: None,
            pending: VecDeque::new(),
            sent_metadata: false,
        }))
    }
}

/// Text drawn, keyed by the timestamp of the frame it was drawn on.
pub type DrawLog = Arc<Mutex<Vec<(i64, String)>>>;

/// Rasterizer that records draws instead of touching pixels.
pub struct RecordingRasterizer {
    draws: DrawLog,
}

impl TextRasterizer for RecordingRasterizer {
    fn measure(&mut self, font: &FontSpec, text: &str) -> SubforgeResult<f32> {
        Ok(text.chars().count() as f32 * font.size * 0.5)
    }

    fn draw_text(
        &mut self,
        frame: &mut VideoFrame,
        _x: f32,
        _y: f32,
        text: &str,
        _paint: &TextPaint,
    ) -> SubforgeResult<()> {
        self.draws
            .lock()
            .unwrap()
            .push((frame.timestamp_us, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFonts {
    pub draws: DrawLog,
}

impl RasterizerFactory for RecordingFonts {
    fn create(&self, _style: &RenderStyle) -> SubforgeResult<Box<dyn TextRasterizer>> {
        Ok(Box::new(RecordingRasterizer {
            draws: self.draws.clone(),
        }))
    }
}

pub fn pipeline(platform: Arc<FakePlatform>, fonts: Arc<RecordingFonts>) -> RenderPipeline {
    RenderPipeline::new(platform, fonts, RenderDefaults::default())
}

/// Scratch path unique to this test process.
pub fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("subforge-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

pub fn aac_config() -> AudioDecoderConfig {
    let mut entry = Vec::new();
    write_box(&mut entry, b"mp4a", |b| {
        b.extend_from_slice(&[0u8; 6]);
        b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
        b.extend_from_slice(&0u16.to_be_bytes()); // version
        b.extend_from_slice(&[0u8; 6]);
        b.extend_from_slice(&2u16.to_be_bytes()); // channels
        b.extend_from_slice(&16u16.to_be_bytes()); // sample size
        b.extend_from_slice(&[0u8; 4]);
        b.extend_from_slice(&(48_000u32 << 16).to_be_bytes());
        write_full_box(b, b"esds", 0, 0, |b| {
            b.extend_from_slice(&[0x03, 22, 0, 1, 0]);
            b.extend_from_slice(&[0x04, 17, 0x40, 0x15]);
            b.extend_from_slice(&[0u8; 11]);
            b.extend_from_slice(&[0x05, 2, 0x11, 0x90]);
        });
    });
    AudioDecoderConfig {
        codec: "mp4a.40.2".into(),
        sample_rate: 48_000,
        number_of_channels: 2,
        description: Some(Bytes::from_static(&[0x11, 0x90])),
        sample_entry: Bytes::from(entry),
    }
}

/// Write a progressive MP4 with `frames` video samples at `fps`, and one
/// audio sample per frame when `audio` is set.
pub fn write_fixture(path: &Path, width: u32, height: u32, frames: u32, fps: u32, audio: bool) {
    let file = File::create(path).unwrap();
    let mut muxer = Mp4Muxer::new(file, width, height).unwrap();
    let config = VideoDecoderConfig {
        codec: "avc1.42E01E".into(),
        coded_width: width,
        coded_height: height,
        description: Some(Bytes::from_static(AVCC)),
    };
    if audio {
        muxer.add_audio_track(&aac_config());
    }

    let frame_us = 1_000_000 / i64::from(fps);
    for i in 0..i64::from(frames) {
        let key = i % 10 == 0;
        let chunk = EncodedVideoChunk {
            kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
            timestamp_us: i * frame_us,
            duration_us: frame_us,
            data: Bytes::from(vec![i as u8; 16]),
        };
        muxer
            .add_video_chunk(&chunk, (i == 0).then_some(&config))
            .unwrap();
        if audio {
            muxer
                .add_audio_chunk(&RawAudioChunk {
                    data: Bytes::from(vec![0xA0; 8]),
                    kind: ChunkKind::Key,
                    timestamp_us: i * frame_us,
                    duration_us: frame_us,
                })
                .unwrap();
        }
    }
    muxer.finalize().unwrap();
}
