//! Progressive MP4 muxer.
//!
//! Samples are appended to a single `mdat` as they arrive; the sample tables
//! are kept in memory and written as a trailing `moov` on finalize. The
//! `mdat` uses a 64-bit size field so it can be patched in place.

use std::io::{Seek, SeekFrom, Write};

use bytes::Bytes;
use subforge_common::error::{SubforgeError, SubforgeResult};
use subforge_common::timebase::micros_to_timescale;

use super::boxes::{write_box, write_full_box, FourCc};
use crate::codec::{
    AudioDecoderConfig, ChunkKind, EncodedVideoChunk, RawAudioChunk, VideoDecoderConfig,
};

/// Timescale of the output video track.
pub const VIDEO_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1_000;

#[derive(Debug, Clone, Copy)]
struct MuxedSample {
    offset: u64,
    size: u32,
    /// Presentation time in track ticks.
    pts: i64,
    duration: u32,
    is_sync: bool,
}

#[derive(Debug)]
struct TrackState {
    timescale: u32,
    samples: Vec<MuxedSample>,
}

impl TrackState {
    fn new(timescale: u32) -> Self {
        Self {
            timescale,
            samples: Vec::new(),
        }
    }

    fn duration(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.duration)).sum()
    }

    fn movie_duration(&self) -> u64 {
        if self.timescale == 0 {
            return 0;
        }
        self.duration() * u64::from(MOVIE_TIMESCALE) / u64::from(self.timescale)
    }
}

#[derive(Debug)]
struct VideoTrack {
    width: u32,
    height: u32,
    config: Option<VideoDecoderConfig>,
    state: TrackState,
}

#[derive(Debug)]
struct AudioTrack {
    sample_entry: Bytes,
    state: TrackState,
}

/// Writes one video track and an optional passthrough audio track.
#[derive(Debug)]
pub struct Mp4Muxer<W: Write + Seek> {
    writer: W,
    mdat_start: u64,
    position: u64,
    video: VideoTrack,
    audio: Option<AudioTrack>,
}

impl<W: Write + Seek> Mp4Muxer<W> {
    /// Start a file: writes `ftyp` and the `mdat` header.
    pub fn new(mut writer: W, width: u32, height: u32) -> SubforgeResult<Self> {
        let mut head = Vec::with_capacity(48);
        write_box(&mut head, b"ftyp", |b| {
            b.extend_from_slice(b"isom");
            b.extend_from_slice(&0x200u32.to_be_bytes());
            for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
                b.extend_from_slice(brand);
            }
        });

        let start = writer.stream_position()?;
        let mdat_start = start + head.len() as u64;
        head.extend_from_slice(&[0, 0, 0, 1]);
        head.extend_from_slice(b"mdat");
        head.extend_from_slice(&[0u8; 8]);
        writer
            .write_all(&head)
            .map_err(|e| SubforgeError::mux(format!("failed to write file header: {e}")))?;

        Ok(Self {
            writer,
            mdat_start,
            position: start + head.len() as u64,
            video: VideoTrack {
                width,
                height,
                config: None,
                state: TrackState::new(VIDEO_TIMESCALE),
            },
            audio: None,
        })
    }

    /// Declare the passthrough audio track. Must precede any audio chunk.
    pub fn add_audio_track(&mut self, config: &AudioDecoderConfig) {
        self.audio = Some(AudioTrack {
            sample_entry: config.sample_entry.clone(),
            state: TrackState::new(config.sample_rate),
        });
    }

    fn append(&mut self, data: &[u8]) -> SubforgeResult<u64> {
        let offset = self.position;
        self.writer
            .write_all(data)
            .map_err(|e| SubforgeError::mux(format!("failed to write sample: {e}")))?;
        self.position += data.len() as u64;
        Ok(offset)
    }

    /// Append an encoded video chunk. `metadata` carries the decoder config
    /// on the encoder's first output.
    pub fn add_video_chunk(
        &mut self,
        chunk: &EncodedVideoChunk,
        metadata: Option<&VideoDecoderConfig>,
    ) -> SubforgeResult<()> {
        if let Some(config) = metadata {
            if self.video.config.is_none() {
                tracing::debug!(codec = %config.codec, "Video track configured");
            }
            self.video.config = Some(config.clone());
        }
        let offset = self.append(&chunk.data)?;
        self.video.state.samples.push(MuxedSample {
            offset,
            size: chunk.data.len() as u32,
            pts: micros_to_timescale(chunk.timestamp_us, VIDEO_TIMESCALE),
            duration: micros_to_timescale(chunk.duration_us, VIDEO_TIMESCALE).max(0) as u32,
            is_sync: chunk.kind == ChunkKind::Key,
        });
        Ok(())
    }

    /// Append a raw audio chunk to the passthrough track.
    pub fn add_audio_chunk(&mut self, chunk: &RawAudioChunk) -> SubforgeResult<()> {
        let Some(timescale) = self.audio.as_ref().map(|a| a.state.timescale) else {
            return Err(SubforgeError::mux("audio chunk received without an audio track"));
        };
        let offset = self.append(&chunk.data)?;
        let sample = MuxedSample {
            offset,
            size: chunk.data.len() as u32,
            pts: micros_to_timescale(chunk.timestamp_us, timescale),
            duration: micros_to_timescale(chunk.duration_us, timescale).max(0) as u32,
            is_sync: chunk.kind == ChunkKind::Key,
        };
        if let Some(audio) = self.audio.as_mut() {
            audio.state.samples.push(sample);
        }
        Ok(())
    }

    pub fn video_sample_count(&self) -> usize {
        self.video.state.samples.len()
    }

    /// Patch the `mdat` size, write `moov`, flush, and hand back the writer.
    pub fn finalize(mut self) -> SubforgeResult<W> {
        let config = self
            .video
            .config
            .clone()
            .ok_or_else(|| SubforgeError::finalize("encoder never produced a decoder config"))?;

        let moov = self.build_moov(&config)?;

        let mdat_size = self.position - self.mdat_start;
        let finalize_io = |e: std::io::Error| SubforgeError::finalize(format!("{e}"));
        self.writer
            .seek(SeekFrom::Start(self.mdat_start + 8))
            .map_err(finalize_io)?;
        self.writer
            .write_all(&mdat_size.to_be_bytes())
            .map_err(finalize_io)?;
        self.writer
            .seek(SeekFrom::Start(self.position))
            .map_err(finalize_io)?;
        self.writer.write_all(&moov).map_err(finalize_io)?;
        self.writer.flush().map_err(finalize_io)?;

        tracing::debug!(
            video_samples = self.video.state.samples.len(),
            audio_samples = self.audio.as_ref().map_or(0, |a| a.state.samples.len()),
            mdat_bytes = mdat_size,
            moov_bytes = moov.len(),
            "MP4 finalized"
        );
        Ok(self.writer)
    }

    fn build_moov(&self, config: &VideoDecoderConfig) -> SubforgeResult<Vec<u8>> {
        let video_entry = video_sample_entry(config, self.video.width, self.video.height)?;
        let track_count = 1 + u32::from(self.audio.is_some());

        let movie_duration = self
            .audio
            .iter()
            .map(|a| a.state.movie_duration())
            .chain(std::iter::once(self.video.state.movie_duration()))
            .max()
            .unwrap_or(0);

        let mut moov = Vec::new();
        write_box(&mut moov, b"moov", |b| {
            write_mvhd(b, movie_duration, track_count + 1);
            write_trak(
                b,
                1,
                &self.video.state,
                TrackMedia::Video {
                    width: self.video.width,
                    height: self.video.height,
                    entry: &video_entry,
                },
            );
            if let Some(audio) = &self.audio {
                write_trak(
                    b,
                    2,
                    &audio.state,
                    TrackMedia::Audio {
                        entry: &audio.sample_entry,
                    },
                );
            }
        });
        Ok(moov)
    }
}

#[derive(Clone, Copy)]
enum TrackMedia<'a> {
    Video {
        width: u32,
        height: u32,
        entry: &'a [u8],
    },
    Audio {
        entry: &'a [u8],
    },
}

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

fn put_u16(b: &mut Vec<u8>, v: u16) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(b: &mut Vec<u8>, v: u32) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(b: &mut Vec<u8>, v: u64) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_matrix(b: &mut Vec<u8>) {
    for v in IDENTITY_MATRIX {
        put_u32(b, v);
    }
}

fn write_mvhd(out: &mut Vec<u8>, duration: u64, next_track_id: u32) {
    write_full_box(out, b"mvhd", 1, 0, |b| {
        put_u64(b, 0); // creation time
        put_u64(b, 0); // modification time
        put_u32(b, MOVIE_TIMESCALE);
        put_u64(b, duration);
        put_u32(b, 0x0001_0000); // rate 1.0
        put_u16(b, 0x0100); // volume 1.0
        b.extend_from_slice(&[0u8; 10]);
        put_matrix(b);
        b.extend_from_slice(&[0u8; 24]);
        put_u32(b, next_track_id);
    });
}

fn write_trak(out: &mut Vec<u8>, track_id: u32, state: &TrackState, media: TrackMedia<'_>) {
    write_box(out, b"trak", |b| {
        write_full_box(b, b"tkhd", 1, 0x03, |b| {
            put_u64(b, 0);
            put_u64(b, 0);
            put_u32(b, track_id);
            put_u32(b, 0);
            put_u64(b, state.movie_duration());
            b.extend_from_slice(&[0u8; 8]);
            put_u16(b, 0); // layer
            put_u16(b, 0); // alternate group
            put_u16(b, if matches!(media, TrackMedia::Audio { .. }) { 0x0100 } else { 0 });
            put_u16(b, 0);
            put_matrix(b);
            let (w, h) = match media {
                TrackMedia::Video { width, height, .. } => (width, height),
                TrackMedia::Audio { .. } => (0, 0),
            };
            put_u32(b, w << 16);
            put_u32(b, h << 16);
        });

        write_box(b, b"mdia", |b| {
            write_full_box(b, b"mdhd", 1, 0, |b| {
                put_u64(b, 0);
                put_u64(b, 0);
                put_u32(b, state.timescale);
                put_u64(b, state.duration());
                put_u16(b, 0x55C4); // "und"
                put_u16(b, 0);
            });

            let (handler, name): (&FourCc, &str) = match media {
                TrackMedia::Video { .. } => (b"vide", "VideoHandler"),
                TrackMedia::Audio { .. } => (b"soun", "SoundHandler"),
            };
            write_full_box(b, b"hdlr", 0, 0, |b| {
                put_u32(b, 0);
                b.extend_from_slice(handler);
                b.extend_from_slice(&[0u8; 12]);
                b.extend_from_slice(name.as_bytes());
                b.push(0);
            });

            write_box(b, b"minf", |b| {
                match media {
                    TrackMedia::Video { .. } => write_full_box(b, b"vmhd", 0, 1, |b| {
                        b.extend_from_slice(&[0u8; 8]);
                    }),
                    TrackMedia::Audio { .. } => write_full_box(b, b"smhd", 0, 0, |b| {
                        b.extend_from_slice(&[0u8; 4]);
                    }),
                }
                write_box(b, b"dinf", |b| {
                    write_full_box(b, b"dref", 0, 0, |b| {
                        put_u32(b, 1);
                        write_full_box(b, b"url ", 0, 1, |_| {});
                    });
                });
                let entry = match media {
                    TrackMedia::Video { entry, .. } | TrackMedia::Audio { entry } => entry,
                };
                write_stbl(b, state, entry, matches!(media, TrackMedia::Video { .. }));
            });
        });
    });
}

fn write_stbl(out: &mut Vec<u8>, state: &TrackState, entry: &[u8], is_video: bool) {
    let samples = &state.samples;
    write_box(out, b"stbl", |b| {
        write_full_box(b, b"stsd", 0, 0, |b| {
            put_u32(b, 1);
            b.extend_from_slice(entry);
        });

        let mut stts: Vec<(u32, u32)> = Vec::new();
        for s in samples {
            match stts.last_mut() {
                Some(last) if last.1 == s.duration => last.0 += 1,
                _ => stts.push((1, s.duration)),
            }
        }
        write_full_box(b, b"stts", 0, 0, |b| {
            put_u32(b, stts.len() as u32);
            for (count, delta) in &stts {
                put_u32(b, *count);
                put_u32(b, *delta);
            }
        });

        let mut ctts: Vec<(u32, i32)> = Vec::new();
        let mut dts = 0i64;
        for s in samples {
            let offset = (s.pts - dts) as i32;
            match ctts.last_mut() {
                Some(last) if last.1 == offset => last.0 += 1,
                _ => ctts.push((1, offset)),
            }
            dts += i64::from(s.duration);
        }
        if ctts.iter().any(|&(_, offset)| offset != 0) {
            write_full_box(b, b"ctts", 1, 0, |b| {
                put_u32(b, ctts.len() as u32);
                for (count, offset) in &ctts {
                    put_u32(b, *count);
                    put_u32(b, *offset as u32);
                }
            });
        }

        if is_video {
            let sync: Vec<u32> = samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_sync)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            write_full_box(b, b"stss", 0, 0, |b| {
                put_u32(b, sync.len() as u32);
                for n in &sync {
                    put_u32(b, *n);
                }
            });
        }

        // One sample per chunk.
        write_full_box(b, b"stsc", 0, 0, |b| {
            if samples.is_empty() {
                put_u32(b, 0);
            } else {
                put_u32(b, 1);
                put_u32(b, 1);
                put_u32(b, 1);
                put_u32(b, 1);
            }
        });

        write_full_box(b, b"stsz", 0, 0, |b| {
            put_u32(b, 0);
            put_u32(b, samples.len() as u32);
            for s in samples {
                put_u32(b, s.size);
            }
        });

        write_full_box(b, b"co64", 0, 0, |b| {
            put_u32(b, samples.len() as u32);
            for s in samples {
                put_u64(b, s.offset);
            }
        });
    });
}

/// Visual sample entry for the encoder's output.
fn video_sample_entry(
    config: &VideoDecoderConfig,
    width: u32,
    height: u32,
) -> SubforgeResult<Vec<u8>> {
    let prefix = config.codec.split('.').next().unwrap_or_default();
    let (fourcc, config_box): (&FourCc, &FourCc) = match prefix {
        "avc1" => (b"avc1", b"avcC"),
        "avc3" => (b"avc3", b"avcC"),
        "hvc1" => (b"hvc1", b"hvcC"),
        "hev1" => (b"hev1", b"hvcC"),
        "vp09" => (b"vp09", b"vpcC"),
        "av01" => (b"av01", b"av1C"),
        other => {
            return Err(SubforgeError::finalize(format!(
                "cannot mux video codec '{other}' into MP4"
            )))
        }
    };

    let mut entry = Vec::new();
    write_box(&mut entry, fourcc, |b| {
        b.extend_from_slice(&[0u8; 6]);
        put_u16(b, 1); // data reference index
        b.extend_from_slice(&[0u8; 16]);
        put_u16(b, width as u16);
        put_u16(b, height as u16);
        put_u32(b, 0x0048_0000); // 72 dpi
        put_u32(b, 0x0048_0000);
        put_u32(b, 0);
        put_u16(b, 1); // frame count
        b.extend_from_slice(&[0u8; 32]);
        put_u16(b, 0x0018);
        put_u16(b, 0xFFFF);
        match &config.description {
            Some(description) => write_box(b, config_box, |b| b.extend_from_slice(description)),
            None => tracing::warn!(codec = %config.codec, "Encoder gave no codec description"),
        }
    });
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::boxes::{children, find_child};
    use crate::mp4::parse::{parse_moov, SampleEntry, TrackKind};
    use std::io::Cursor;

    fn avc_config() -> VideoDecoderConfig {
        VideoDecoderConfig {
            codec: "avc1.42E01E".into(),
            coded_width: 320,
            coded_height: 240,
            description: Some(Bytes::from_static(&[1, 0x42, 0xE0, 0x1E, 0xFF, 0xE0, 0x00])),
        }
    }

    fn chunk(i: i64, key: bool) -> EncodedVideoChunk {
        EncodedVideoChunk {
            kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
            timestamp_us: i * 40_000,
            duration_us: 40_000,
            data: Bytes::from(vec![i as u8; 10 + i as usize]),
        }
    }

    #[test]
    fn test_finalize_requires_decoder_config() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), 320, 240).unwrap();
        muxer.add_video_chunk(&chunk(0, true), None).unwrap();
        let err = muxer.finalize().unwrap_err();
        assert_eq!(err.stage(), "finalize");
    }

    #[test]
    fn test_audio_without_track_is_mux_error() {
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), 320, 240).unwrap();
        let audio = RawAudioChunk {
            data: Bytes::from_static(&[1, 2]),
            kind: ChunkKind::Key,
            timestamp_us: 0,
            duration_us: 21_333,
        };
        assert!(muxer.add_audio_chunk(&audio).is_err());
    }

    #[test]
    fn test_written_moov_parses_back() {
        let config = avc_config();
        let mut muxer = Mp4Muxer::new(Cursor::new(Vec::new()), 320, 240).unwrap();
        for i in 0..5 {
            muxer
                .add_video_chunk(&chunk(i, i == 0), (i == 0).then_some(&config))
                .unwrap();
        }
        let bytes = muxer.finalize().unwrap().into_inner();

        let top = children(&bytes).unwrap();
        let kinds: Vec<_> = top.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![*b"ftyp", *b"mdat", *b"moov"]);

        let moov = find_child(&bytes, b"moov").unwrap().unwrap();
        let movie = parse_moov(moov).unwrap();
        let video = movie.first_track(TrackKind::Video).unwrap();
        assert_eq!(video.timescale, VIDEO_TIMESCALE);
        assert_eq!(video.samples.len(), 5);
        assert_eq!(video.samples[2].cts, 7_200);
        assert!(video.samples[0].is_sync && !video.samples[1].is_sync);
        assert!((video.duration_secs() - 0.2).abs() < 1e-9);
        match &video.entry {
            SampleEntry::Video { codec, width, .. } => {
                assert_eq!(codec.as_deref(), Some("avc1.42E01E"));
                assert_eq!(*width, 320);
            }
            other => panic!("unexpected entry {other:?}"),
        }

        let first = video.samples[0];
        let start = first.offset as usize;
        assert_eq!(&bytes[start..start + first.size as usize], &[0u8; 10][..]);
    }

    #[test]
    fn test_unknown_codec_cannot_be_muxed() {
        let mut config = avc_config();
        config.codec = "theora".into();
        assert!(video_sample_entry(&config, 16, 16).is_err());
    }
}
