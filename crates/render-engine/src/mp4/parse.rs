//! `moov` parsing into flat per-track sample tables.

use bytes::Bytes;
use subforge_common::error::{SubforgeError, SubforgeResult};

use super::boxes::{children, find_child, fourcc_str, ByteReader, FourCc, RawBox};
use super::codec_string::{self, parse_esds};

/// Track media type from the handler box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// Decoded sample description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEntry {
    Video {
        fourcc: FourCc,
        width: u16,
        height: u16,
        /// Codec string, when the configuration record was understood.
        codec: Option<String>,
        /// Configuration record payload (box header stripped).
        config: Option<Bytes>,
    },
    Audio {
        fourcc: FourCc,
        channels: u16,
        sample_rate: u32,
        codec: Option<String>,
        config: Option<Bytes>,
        /// Whole sample entry box, for passthrough muxing.
        raw: Bytes,
    },
    Other {
        fourcc: FourCc,
    },
}

/// Location and timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Absolute file offset.
    pub offset: u64,
    pub size: u32,
    /// Decode time in track ticks.
    pub dts: i64,
    /// Composition (presentation) time in track ticks.
    pub cts: i64,
    pub duration: u32,
    pub is_sync: bool,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub kind: TrackKind,
    pub timescale: u32,
    /// Media duration in track ticks.
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    pub entry: SampleEntry,
    pub samples: Vec<SampleInfo>,
}

impl TrackInfo {
    /// Media duration in seconds, falling back to the sum of sample durations.
    pub fn duration_secs(&self) -> f64 {
        let ticks = if self.duration > 0 {
            self.duration
        } else {
            self.samples.iter().map(|s| u64::from(s.duration)).sum()
        };
        subforge_common::timebase::ticks_to_secs(ticks, self.timescale)
    }
}

#[derive(Debug, Clone)]
pub struct MovieInfo {
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<TrackInfo>,
}

impl MovieInfo {
    pub fn first_track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// Parse a complete `moov` payload.
pub fn parse_moov(moov: &[u8]) -> SubforgeResult<MovieInfo> {
    let mut timescale = 0;
    let mut duration = 0;
    let mut tracks = Vec::new();

    for child in children(moov)? {
        match &child.kind {
            b"mvhd" => (timescale, duration) = parse_time_header(child.payload)?,
            b"trak" => match parse_trak(child.payload) {
                Ok(track) => tracks.push(track),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable track"),
            },
            _ => {}
        }
    }

    Ok(MovieInfo {
        timescale,
        duration,
        tracks,
    })
}

/// `(timescale, duration)` from an mvhd or mdhd payload.
fn parse_time_header(data: &[u8]) -> SubforgeResult<(u32, u64)> {
    let mut r = ByteReader::new(data);
    let (version, _) = r.full_box_header()?;
    if version == 1 {
        r.skip(16)?;
        let timescale = r.u32()?;
        Ok((timescale, r.u64()?))
    } else {
        r.skip(8)?;
        let timescale = r.u32()?;
        Ok((timescale, u64::from(r.u32()?)))
    }
}

fn parse_tkhd(data: &[u8]) -> SubforgeResult<(u32, u32, u32)> {
    let mut r = ByteReader::new(data);
    let (version, _) = r.full_box_header()?;
    let track_id = if version == 1 {
        r.skip(16)?;
        let id = r.u32()?;
        r.skip(4 + 8)?;
        id
    } else {
        r.skip(8)?;
        let id = r.u32()?;
        r.skip(4 + 4)?;
        id
    };
    // reserved, layer, alternate group, volume, reserved, matrix
    r.skip(8 + 2 + 2 + 2 + 2 + 36)?;
    let width = r.u32()? >> 16;
    let height = r.u32()? >> 16;
    Ok((track_id, width, height))
}

fn parse_hdlr(data: &[u8]) -> SubforgeResult<TrackKind> {
    let mut r = ByteReader::new(data);
    r.full_box_header()?;
    r.skip(4)?;
    Ok(match r.bytes(4)? {
        b"vide" => TrackKind::Video,
        b"soun" => TrackKind::Audio,
        _ => TrackKind::Other,
    })
}

fn require<'a>(data: &'a [u8], kind: &FourCc, parent: &str) -> SubforgeResult<&'a [u8]> {
    find_child(data, kind)?.ok_or_else(|| {
        SubforgeError::demux(format!("'{parent}' has no '{}' box", fourcc_str(kind)))
    })
}

fn parse_trak(trak: &[u8]) -> SubforgeResult<TrackInfo> {
    let (track_id, tk_width, tk_height) = parse_tkhd(require(trak, b"tkhd", "trak")?)?;
    let mdia = require(trak, b"mdia", "trak")?;
    let (timescale, duration) = parse_time_header(require(mdia, b"mdhd", "mdia")?)?;
    let kind = parse_hdlr(require(mdia, b"hdlr", "mdia")?)?;
    let minf = require(mdia, b"minf", "mdia")?;
    let stbl = require(minf, b"stbl", "minf")?;

    let entry = parse_stsd(require(stbl, b"stsd", "stbl")?, kind)?;
    let samples = SampleTables::parse(stbl)?.expand()?;

    let (width, height) = match &entry {
        SampleEntry::Video { width, height, .. } if *width > 0 && *height > 0 => {
            (u32::from(*width), u32::from(*height))
        }
        _ => (tk_width, tk_height),
    };

    Ok(TrackInfo {
        track_id,
        kind,
        timescale,
        duration,
        width,
        height,
        entry,
        samples,
    })
}

fn parse_stsd(stsd: &[u8], kind: TrackKind) -> SubforgeResult<SampleEntry> {
    let mut r = ByteReader::new(stsd);
    r.full_box_header()?;
    r.u32()?;
    let entries = children(&stsd[r.position()..])?;
    let entry = entries
        .first()
        .ok_or_else(|| SubforgeError::demux("stsd has no sample entries"))?;

    match kind {
        TrackKind::Video => parse_visual_entry(entry),
        TrackKind::Audio => parse_audio_entry(entry),
        TrackKind::Other => Ok(SampleEntry::Other { fourcc: entry.kind }),
    }
}

fn parse_visual_entry(entry: &RawBox<'_>) -> SubforgeResult<SampleEntry> {
    let mut r = ByteReader::new(entry.payload);
    r.skip(6 + 2 + 16)?;
    let width = r.u16()?;
    let height = r.u16()?;
    // resolutions, reserved, frame count, compressor name, depth, pre-defined
    r.skip(4 + 4 + 4 + 2 + 32 + 2 + 2)?;
    let boxes = children(&entry.payload[r.position()..])?;

    let config_kind: &FourCc = match &entry.kind {
        b"avc1" | b"avc3" => b"avcC",
        b"hvc1" | b"hev1" => b"hvcC",
        b"vp09" => b"vpcC",
        b"av01" => b"av1C",
        _ => {
            return Ok(SampleEntry::Video {
                fourcc: entry.kind,
                width,
                height,
                codec: None,
                config: None,
            })
        }
    };

    let config = boxes
        .iter()
        .find(|b| &b.kind == config_kind)
        .map(|b| b.payload);
    let codec = match (config, &entry.kind) {
        (Some(c), b"avc1" | b"avc3") => Some(codec_string::avc(&entry.kind, c)?),
        (Some(c), b"hvc1" | b"hev1") => Some(codec_string::hevc(&entry.kind, c)?),
        (Some(c), b"vp09") => Some(codec_string::vp9(c)?),
        (Some(c), b"av01") => Some(codec_string::av1(c)?),
        _ => None,
    };

    Ok(SampleEntry::Video {
        fourcc: entry.kind,
        width,
        height,
        codec,
        config: config.map(Bytes::copy_from_slice),
    })
}

fn parse_audio_entry(entry: &RawBox<'_>) -> SubforgeResult<SampleEntry> {
    let mut r = ByteReader::new(entry.payload);
    r.skip(6 + 2)?;
    let version = r.u16()?;
    r.skip(2 + 4)?;
    let channels = r.u16()?;
    r.skip(2 + 2 + 2)?;
    let sample_rate = r.u32()? >> 16;
    match version {
        1 => r.skip(16)?,
        2 => r.skip(36)?,
        _ => {}
    }
    let boxes = children(&entry.payload[r.position()..])?;

    let (codec, config) = match &entry.kind {
        b"mp4a" => match boxes.iter().find(|b| &b.kind == b"esds") {
            Some(esds) => {
                let desc = parse_esds(esds.payload)?;
                let codec = desc.codec_string();
                (Some(codec), Some(Bytes::from(desc.specific_info)))
            }
            None => (None, None),
        },
        b"Opus" => (
            Some("opus".to_string()),
            boxes
                .iter()
                .find(|b| &b.kind == b"dOps")
                .map(|b| Bytes::copy_from_slice(b.payload)),
        ),
        _ => (None, None),
    };

    Ok(SampleEntry::Audio {
        fourcc: entry.kind,
        channels,
        sample_rate,
        codec,
        config,
        raw: Bytes::copy_from_slice(entry.raw),
    })
}

/// An explicit `stsz` inside the largest accepted `moov` lists at most this
/// many samples.
const MAX_TRACK_SAMPLES: u64 = 64 * 1024 * 1024;

/// Raw sample tables of one `stbl`.
#[derive(Debug, Default)]
struct SampleTables {
    stts: Vec<(u32, u32)>,
    ctts: Vec<(u32, i32)>,
    stss: Option<Vec<u32>>,
    sizes: Vec<u32>,
    /// `(size, count)` of an `stsz` that gives one size for every sample.
    uniform: Option<(u32, u32)>,
    stsc: Vec<(u32, u32)>,
    chunk_offsets: Vec<u64>,
}

impl SampleTables {
    fn parse(stbl: &[u8]) -> SubforgeResult<Self> {
        let mut t = Self::default();

        for child in children(stbl)? {
            let mut r = ByteReader::new(child.payload);
            match &child.kind {
                b"stts" => {
                    r.full_box_header()?;
                    for _ in 0..r.entry_count(8)? {
                        t.stts.push((r.u32()?, r.u32()?));
                    }
                }
                b"ctts" => {
                    r.full_box_header()?;
                    for _ in 0..r.entry_count(8)? {
                        t.ctts.push((r.u32()?, r.i32()?));
                    }
                }
                b"stss" => {
                    r.full_box_header()?;
                    let n = r.entry_count(4)?;
                    let mut sync = Vec::with_capacity(n);
                    for _ in 0..n {
                        sync.push(r.u32()?);
                    }
                    t.stss = Some(sync);
                }
                b"stsz" => {
                    r.full_box_header()?;
                    let uniform = r.u32()?;
                    if uniform != 0 {
                        t.uniform = Some((uniform, r.u32()?));
                    } else {
                        for _ in 0..r.entry_count(4)? {
                            t.sizes.push(r.u32()?);
                        }
                    }
                }
                b"stsc" => {
                    r.full_box_header()?;
                    for _ in 0..r.entry_count(12)? {
                        let first_chunk = r.u32()?;
                        let per_chunk = r.u32()?;
                        r.u32()?;
                        t.stsc.push((first_chunk, per_chunk));
                    }
                }
                b"stco" => {
                    r.full_box_header()?;
                    for _ in 0..r.entry_count(4)? {
                        t.chunk_offsets.push(u64::from(r.u32()?));
                    }
                }
                b"co64" => {
                    r.full_box_header()?;
                    for _ in 0..r.entry_count(8)? {
                        t.chunk_offsets.push(r.u64()?);
                    }
                }
                _ => {}
            }
        }

        if let Some((size, count)) = t.uniform.take() {
            let capacity = t.chunk_capacity().min(MAX_TRACK_SAMPLES);
            if u64::from(count) > capacity {
                return Err(SubforgeError::demux(format!(
                    "stsz claims {count} samples but the chunk tables hold at most {capacity}"
                )));
            }
            t.sizes = vec![size; count as usize];
        }

        Ok(t)
    }

    /// Number of samples the `stsc`/chunk offset tables can place.
    fn chunk_capacity(&self) -> u64 {
        let chunks = self.chunk_offsets.len() as u64;
        let mut capacity = 0u64;
        for (i, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let first = u64::from(first_chunk.saturating_sub(1)).min(chunks);
            let last = match self.stsc.get(i + 1) {
                Some(&(next_first, _)) => u64::from(next_first.saturating_sub(1)).min(chunks),
                None => chunks,
            };
            let run = last.saturating_sub(first);
            capacity = capacity.saturating_add(run.saturating_mul(u64::from(per_chunk)));
        }
        capacity
    }

    /// Flatten the run-length tables into one entry per sample.
    fn expand(self) -> SubforgeResult<Vec<SampleInfo>> {
        let count = self.sizes.len();

        let mut offsets = Vec::with_capacity(count);
        for (i, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let first = first_chunk.saturating_sub(1) as usize;
            let last = match self.stsc.get(i + 1) {
                Some(&(next_first, _)) => {
                    (next_first.saturating_sub(1) as usize).min(self.chunk_offsets.len())
                }
                None => self.chunk_offsets.len(),
            };
            for chunk in first..last {
                let mut offset = self.chunk_offsets[chunk];
                for _ in 0..per_chunk {
                    if offsets.len() == count {
                        break;
                    }
                    let size = self.sizes[offsets.len()];
                    offsets.push(offset);
                    offset += u64::from(size);
                }
            }
        }
        if offsets.len() != count {
            return Err(SubforgeError::demux(format!(
                "chunk tables locate {} of {count} samples",
                offsets.len()
            )));
        }

        let mut durations = Vec::with_capacity(count);
        for &(n, delta) in &self.stts {
            for _ in 0..n {
                if durations.len() == count {
                    break;
                }
                durations.push(delta);
            }
        }
        let last_delta = durations.last().copied().unwrap_or(0);
        durations.resize(count, last_delta);

        let mut cts_offsets = Vec::with_capacity(count);
        for &(n, off) in &self.ctts {
            for _ in 0..n {
                if cts_offsets.len() == count {
                    break;
                }
                cts_offsets.push(off);
            }
        }
        cts_offsets.resize(count, 0);

        let mut is_sync = vec![self.stss.is_none(); count];
        if let Some(stss) = &self.stss {
            for &n in stss {
                if let Some(flag) = (n as usize).checked_sub(1).and_then(|i| is_sync.get_mut(i)) {
                    *flag = true;
                }
            }
        }

        let mut dts = 0i64;
        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            samples.push(SampleInfo {
                offset: offsets[i],
                size: self.sizes[i],
                dts,
                cts: dts + i64::from(cts_offsets[i]),
                duration: durations[i],
                is_sync: is_sync[i],
            });
            dts += i64::from(durations[i]);
        }
        Ok(samples)
    }
}
