//! Container demuxing into codec configs and a chronological sample stream.
//!
//! The source is scanned box by box through a bounded read buffer; only
//! `moov` is loaded into memory. Samples of the first video track and the
//! first audio track are then read in file order, each track staying in its
//! own decode order.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use subforge_common::error::{SubforgeError, SubforgeResult};
use subforge_common::timebase::to_micros;

use crate::codec::{
    AudioDecoderConfig, ChunkKind, EncodedVideoChunk, RawAudioChunk, VideoDecoderConfig,
};
use crate::mp4::boxes::{fourcc_str, BoxHeader};
use crate::mp4::parse::{parse_moov, MovieInfo, SampleEntry, SampleInfo, TrackInfo, TrackKind};

/// Largest `moov` we are willing to load.
const MAX_MOOV_BYTES: u64 = 256 * 1024 * 1024;

/// Source properties reported alongside the track configs.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    /// Average video bitrate in bits per second, when computable.
    pub bitrate: Option<f64>,
    /// Video duration in seconds.
    pub duration: f64,
    /// Video track timescale.
    pub timescale: u32,
    /// Total number of video samples.
    pub sample_count: u64,
}

/// Track configuration emitted once before any sample.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    pub video: VideoDecoderConfig,
    pub audio: Option<AudioDecoderConfig>,
    pub metadata: Metadata,
}

/// One step of the demuxed stream.
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    Config(DemuxConfig),
    VideoChunk(EncodedVideoChunk),
    AudioChunk(RawAudioChunk),
}

/// Callback surface of the demuxer.
pub trait DemuxHandler {
    fn on_config(
        &mut self,
        video: &VideoDecoderConfig,
        audio: Option<&AudioDecoderConfig>,
        metadata: &Metadata,
    );

    fn on_video_chunk(&mut self, chunk: EncodedVideoChunk);

    fn on_raw_audio_chunk(
        &mut self,
        data: Bytes,
        kind: ChunkKind,
        timestamp_us: i64,
        duration_us: i64,
    );

    fn on_status(&mut self, phase: &str, detail: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Video,
    Audio,
}

#[derive(Debug)]
struct SelectedTrack {
    timescale: u32,
    samples: Vec<SampleInfo>,
}

/// Pull-based MP4 demuxer.
pub struct Demuxer<R: Read + Seek> {
    reader: R,
    config: DemuxConfig,
    video: SelectedTrack,
    audio: Option<SelectedTrack>,
    /// Merged (stream, sample index) read order.
    order: Vec<(Stream, usize)>,
    cursor: usize,
    config_sent: bool,
}

impl Demuxer<BufReader<File>> {
    /// Open a file, reading through a buffer of `read_chunk_bytes`.
    pub fn open(path: &Path, read_chunk_bytes: usize) -> SubforgeResult<Self> {
        if !path.exists() {
            return Err(SubforgeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        Self::new(BufReader::with_capacity(read_chunk_bytes.max(4096), file))
    }
}

impl<R: Read + Seek> Demuxer<R> {
    /// Scan the container and resolve tracks. Fails if there is no usable video track.
    pub fn new(mut reader: R) -> SubforgeResult<Self> {
        let movie = read_movie(&mut reader)?;

        let video_track = movie
            .first_track(TrackKind::Video)
            .ok_or_else(|| SubforgeError::demux("no video track found"))?;
        let video = video_config(video_track)?;

        let audio_track = movie.first_track(TrackKind::Audio);
        let audio = match audio_track.map(audio_config) {
            Some(Ok(config)) => Some(config),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ignoring unusable audio track");
                None
            }
            None => None,
        };

        let metadata = metadata_for(video_track);
        tracing::info!(
            codec = %video.codec,
            width = metadata.width,
            height = metadata.height,
            samples = metadata.sample_count,
            duration = metadata.duration,
            audio = audio.as_ref().map(|a| a.codec.as_str()).unwrap_or("none"),
            "Source demuxed"
        );

        let video_sel = SelectedTrack {
            timescale: video_track.timescale,
            samples: video_track.samples.clone(),
        };
        let audio_sel = match (&audio, audio_track) {
            (Some(_), Some(track)) => Some(SelectedTrack {
                timescale: track.timescale,
                samples: track.samples.clone(),
            }),
            _ => None,
        };
        let order = merge_order(&video_sel, audio_sel.as_ref());

        Ok(Self {
            reader,
            config: DemuxConfig {
                video,
                audio,
                metadata,
            },
            video: video_sel,
            audio: audio_sel,
            order,
            cursor: 0,
            config_sent: false,
        })
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Metadata {
        &self.config.metadata
    }

    /// Whether every sample has been returned.
    pub fn is_done(&self) -> bool {
        self.config_sent && self.cursor >= self.order.len()
    }

    /// Next event: the config first, then samples in file order, then `None`.
    pub fn next_event(&mut self) -> SubforgeResult<Option<DemuxEvent>> {
        if !self.config_sent {
            self.config_sent = true;
            return Ok(Some(DemuxEvent::Config(self.config.clone())));
        }

        let Some(&(stream, index)) = self.order.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let track = match stream {
            Stream::Video => &self.video,
            Stream::Audio => match &self.audio {
                Some(audio) => audio,
                None => return Err(SubforgeError::demux("audio sample without audio track")),
            },
        };
        let sample = track.samples[index];
        let timescale = track.timescale;
        let data = read_sample(&mut self.reader, &sample)?;

        let kind = if sample.is_sync {
            ChunkKind::Key
        } else {
            ChunkKind::Delta
        };
        let timestamp_us = to_micros(sample.cts, timescale);
        let duration_us = to_micros(i64::from(sample.duration), timescale);

        Ok(Some(match stream {
            Stream::Video => DemuxEvent::VideoChunk(EncodedVideoChunk {
                kind,
                timestamp_us,
                duration_us,
                data,
            }),
            Stream::Audio => DemuxEvent::AudioChunk(RawAudioChunk {
                data,
                kind,
                timestamp_us,
                duration_us,
            }),
        }))
    }

    /// Drive `handler` through the whole stream.
    pub fn run<H: DemuxHandler + ?Sized>(mut self, handler: &mut H) -> SubforgeResult<()> {
        loop {
            match self.next_event() {
                Ok(Some(DemuxEvent::Config(config))) => {
                    handler.on_status("demux", "configured");
                    handler.on_config(&config.video, config.audio.as_ref(), &config.metadata);
                }
                Ok(Some(DemuxEvent::VideoChunk(chunk))) => handler.on_video_chunk(chunk),
                Ok(Some(DemuxEvent::AudioChunk(chunk))) => handler.on_raw_audio_chunk(
                    chunk.data,
                    chunk.kind,
                    chunk.timestamp_us,
                    chunk.duration_us,
                ),
                Ok(None) => {
                    handler.on_status("demux", "done");
                    return Ok(());
                }
                Err(e) => {
                    handler.on_status("demux", &e.to_string());
                    return Err(e);
                }
            }
        }
    }
}

/// Open `path` and drive `handler`, reporting open failures through `on_status`.
pub fn demux_file<H: DemuxHandler + ?Sized>(
    path: &Path,
    read_chunk_bytes: usize,
    handler: &mut H,
) -> SubforgeResult<()> {
    match Demuxer::open(path, read_chunk_bytes) {
        Ok(demuxer) => demuxer.run(handler),
        Err(e) => {
            handler.on_status("demux", &e.to_string());
            Err(e)
        }
    }
}

/// Scan top-level boxes until `moov` is found and parse it.
fn read_movie<R: Read + Seek>(reader: &mut R) -> SubforgeResult<MovieInfo> {
    reader.seek(SeekFrom::Start(0))?;
    let mut seen_ftyp = false;

    while let Some(header) = BoxHeader::read(reader)? {
        tracing::trace!(kind = %fourcc_str(&header.kind), offset = header.offset, size = header.size, "Top-level box");
        match &header.kind {
            b"ftyp" => seen_ftyp = true,
            b"moov" => {
                if header.content_len() > MAX_MOOV_BYTES {
                    return Err(SubforgeError::demux(format!(
                        "moov of {} bytes is too large",
                        header.content_len()
                    )));
                }
                let mut moov = vec![0u8; header.content_len() as usize];
                reader
                    .read_exact(&mut moov)
                    .map_err(|e| SubforgeError::demux(format!("truncated moov: {e}")))?;
                return parse_moov(&moov);
            }
            _ if !seen_ftyp && header.offset == 0 => {
                return Err(SubforgeError::demux(format!(
                    "not an MP4 file (first box is '{}')",
                    fourcc_str(&header.kind)
                )));
            }
            _ => {}
        }
        reader.seek(SeekFrom::Start(header.end()))?;
    }

    Err(SubforgeError::demux("no moov box found"))
}

fn read_sample<R: Read + Seek>(reader: &mut R, sample: &SampleInfo) -> SubforgeResult<Bytes> {
    reader.seek(SeekFrom::Start(sample.offset))?;
    let mut data = vec![0u8; sample.size as usize];
    reader.read_exact(&mut data).map_err(|e| {
        SubforgeError::demux(format!(
            "sample at offset {} ({} bytes) is unreadable: {e}",
            sample.offset, sample.size
        ))
    })?;
    Ok(Bytes::from(data))
}

fn video_config(track: &TrackInfo) -> SubforgeResult<VideoDecoderConfig> {
    match &track.entry {
        SampleEntry::Video {
            codec: Some(codec),
            config: Some(config),
            ..
        } => Ok(VideoDecoderConfig {
            codec: codec.clone(),
            coded_width: track.width,
            coded_height: track.height,
            description: Some(config.clone()),
        }),
        SampleEntry::Video { fourcc, .. } => Err(SubforgeError::demux(format!(
            "video sample entry '{}' has no supported codec configuration",
            fourcc_str(fourcc)
        ))),
        _ => Err(SubforgeError::demux("video track has no visual sample entry")),
    }
}

fn audio_config(track: &TrackInfo) -> SubforgeResult<AudioDecoderConfig> {
    match &track.entry {
        SampleEntry::Audio {
            fourcc,
            channels,
            sample_rate,
            codec,
            config,
            raw,
        } => Ok(AudioDecoderConfig {
            codec: codec.clone().unwrap_or_else(|| fourcc_str(fourcc)),
            sample_rate: if *sample_rate > 0 {
                *sample_rate
            } else {
                track.timescale
            },
            number_of_channels: *channels,
            description: config.clone(),
            sample_entry: raw.clone(),
        }),
        _ => Err(SubforgeError::demux("audio track has no audio sample entry")),
    }
}

fn metadata_for(track: &TrackInfo) -> Metadata {
    let duration = track.duration_secs();
    let total_bytes: u64 = track.samples.iter().map(|s| u64::from(s.size)).sum();
    let bitrate = (duration > 0.0).then(|| total_bytes as f64 * 8.0 / duration);
    Metadata {
        width: track.width,
        height: track.height,
        bitrate,
        duration,
        timescale: track.timescale,
        sample_count: track.samples.len() as u64,
    }
}

/// Interleave both tracks by file offset while keeping each in index order.
fn merge_order(video: &SelectedTrack, audio: Option<&SelectedTrack>) -> Vec<(Stream, usize)> {
    let audio_samples: &[SampleInfo] = audio.map(|a| a.samples.as_slice()).unwrap_or(&[]);
    let mut order = Vec::with_capacity(video.samples.len() + audio_samples.len());
    let (mut v, mut a) = (0, 0);

    while v < video.samples.len() || a < audio_samples.len() {
        let take_video = match (video.samples.get(v), audio_samples.get(a)) {
            (Some(vs), Some(as_)) => vs.offset <= as_.offset,
            (Some(_), None) => true,
            _ => false,
        };
        if take_video {
            order.push((Stream::Video, v));
            v += 1;
        } else {
            order.push((Stream::Audio, a));
            a += 1;
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(offset: u64) -> SampleInfo {
        SampleInfo {
            offset,
            size: 1,
            dts: 0,
            cts: 0,
            duration: 1,
            is_sync: true,
        }
    }

    #[test]
    fn test_merge_order_interleaves_by_offset() {
        let video = SelectedTrack {
            timescale: 1,
            samples: vec![sample(10), sample(30), sample(50)],
        };
        let audio = SelectedTrack {
            timescale: 1,
            samples: vec![sample(20), sample(40)],
        };
        let order = merge_order(&video, Some(&audio));
        assert_eq!(
            order,
            vec![
                (Stream::Video, 0),
                (Stream::Audio, 0),
                (Stream::Video, 1),
                (Stream::Audio, 1),
                (Stream::Video, 2),
            ]
        );
    }

    #[test]
    fn test_rejects_non_mp4() {
        let err = Demuxer::new(Cursor::new(b"\x00\x00\x00\x10RIFFxxxxxxxx".to_vec()))
            .err()
            .unwrap();
        assert_eq!(err.stage(), "demux");
    }

    #[test]
    fn test_rejects_missing_moov() {
        let mut data = Vec::new();
        crate::mp4::boxes::write_box(&mut data, b"ftyp", |b| b.extend_from_slice(b"isom\0\0\0\0"));
        let err = Demuxer::new(Cursor::new(data)).err().unwrap();
        assert!(err.to_string().contains("no moov"));
    }

    #[test]
    fn test_rejects_uniform_stsz_with_impossible_count() {
        use crate::mp4::Mp4Muxer;

        let config = VideoDecoderConfig {
            codec: "avc1.42E01E".into(),
            coded_width: 64,
            coded_height: 48,
            description: Some(Bytes::from_static(&[1, 0x42, 0xE0, 0x1E, 0xFF, 0xE0, 0x00])),
        };
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), 64, 48).unwrap();
        for i in 0..3i64 {
            let chunk = EncodedVideoChunk {
                kind: if i == 0 { ChunkKind::Key } else { ChunkKind::Delta },
                timestamp_us: i * 40_000,
                duration_us: 40_000,
                data: Bytes::from(vec![0u8; 8]),
            };
            muxer
                .add_video_chunk(&chunk, (i == 0).then_some(&config))
                .unwrap();
        }
        let mut data = muxer.finalize().unwrap().into_inner();

        // Rewrite stsz as one uniform size covering u32::MAX samples.
        let at = data.windows(4).position(|w| w == b"stsz").unwrap();
        data[at + 8..at + 12].copy_from_slice(&1u32.to_be_bytes());
        data[at + 12..at + 16].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = Demuxer::new(Cursor::new(data)).err().unwrap();
        assert_eq!(err.stage(), "demux");
    }

    #[test]
    fn test_missing_file() {
        let err = Demuxer::open(Path::new("/nonexistent/video.mp4"), 1 << 16)
            .err()
            .unwrap();
        assert!(matches!(err, SubforgeError::FileNotFound { .. }));
    }
}
