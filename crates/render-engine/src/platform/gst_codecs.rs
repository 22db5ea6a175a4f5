//! GStreamer codec platform.
//!
//! Decoding runs `appsrc ! decodebin ! videoconvert ! appsink` producing RGBA
//! frames; encoding runs `appsrc ! videoconvert ! <encoder> ! <parser> ! appsink`
//! producing access units with an `avcC`/`hvcC` record in the output caps.
//! Samples arrive on GStreamer streaming threads and are forwarded over a
//! channel, so awaiting output is cancel safe.

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use subforge_common::error::{SubforgeError, SubforgeResult};
use tokio::sync::mpsc;

use crate::codec::{
    ChunkKind, CodecPlatform, EncodeOptions, EncodedOutput, EncodedVideoChunk, VideoDecoder,
    VideoDecoderConfig, VideoEncoder, VideoEncoderConfig, VideoFrame,
};
use crate::mp4::codec_string;

fn init_gstreamer() -> SubforgeResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(SubforgeError::codec(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    H264,
    H265,
    Vp9,
    Av1,
}

impl Family {
    fn from_codec(codec: &str) -> Option<Self> {
        match codec.split('.').next()? {
            "avc1" | "avc3" => Some(Self::H264),
            "hvc1" | "hev1" => Some(Self::H265),
            "vp09" => Some(Self::Vp9),
            "av01" => Some(Self::Av1),
            _ => None,
        }
    }

    /// (encoder element, parser element, output caps, sample entry fourcc)
    fn encoder_chain(self) -> Option<(&'static str, &'static str, &'static str, &'static [u8; 4])> {
        match self {
            Self::H264 => Some((
                "x264enc",
                "h264parse",
                "video/x-h264,stream-format=avc,alignment=au",
                b"avc1",
            )),
            Self::H265 => Some((
                "x265enc",
                "h265parse",
                "video/x-h265,stream-format=hvc1,alignment=au",
                b"hvc1",
            )),
            // No vpcC/av1C is produced by the parsers, so the muxer could not
            // describe the track.
            Self::Vp9 | Self::Av1 => None,
        }
    }
}

/// Caps describing encoded input for the decoder.
fn decoder_caps(config: &VideoDecoderConfig) -> Option<gst::Caps> {
    let family = Family::from_codec(&config.codec)?;
    let mut builder = match family {
        Family::H264 => gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au"),
        Family::H265 => gst::Caps::builder("video/x-h265")
            .field("stream-format", "hvc1")
            .field("alignment", "au"),
        Family::Vp9 => gst::Caps::builder("video/x-vp9"),
        Family::Av1 => gst::Caps::builder("video/x-av1")
            .field("stream-format", "obu-stream")
            .field("alignment", "tu"),
    };
    builder = builder
        .field("width", config.coded_width as i32)
        .field("height", config.coded_height as i32);
    if let Some(description) = &config.description {
        if matches!(family, Family::H264 | Family::H265 | Family::Av1) {
            builder = builder.field("codec_data", gst::Buffer::from_slice(description.clone()));
        }
    }
    Some(builder.build())
}

fn has_element(name: &str) -> bool {
    gst::ElementFactory::find(name).is_some()
}

fn launch(description: &str) -> SubforgeResult<(gst::Pipeline, gst::Element, gst::Element)> {
    init_gstreamer()?;
    let element = gst::parse::launch(description)
        .map_err(|e| SubforgeError::codec(format!("Failed to build pipeline: {e}")))?;
    let pipeline = element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| SubforgeError::codec("Launch string did not produce a pipeline"))?;
    let src = pipeline
        .by_name("src")
        .ok_or_else(|| SubforgeError::codec("pipeline has no appsrc"))?;
    let sink = pipeline
        .by_name("sink")
        .ok_or_else(|| SubforgeError::codec("pipeline has no appsink"))?;
    Ok((pipeline, src, sink))
}

fn clock_time(micros: i64) -> gst::ClockTime {
    gst::ClockTime::from_useconds(micros.max(0) as u64)
}

fn micros(time: Option<gst::ClockTime>) -> i64 {
    time.map(|t| t.useconds() as i64).unwrap_or(0)
}

/// Output of an appsink as seen by the async side.
enum SinkEvent<T> {
    Item(T),
    Eos,
    Error(String),
}

/// Wire appsink signals and bus errors into a channel.
fn connect_sink<T, F>(
    pipeline: &gst::Pipeline,
    sink: &gst::Element,
    convert: F,
) -> mpsc::UnboundedReceiver<SinkEvent<T>>
where
    T: Send + 'static,
    F: FnMut(&gst::Sample) -> Result<T, String> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let sample_tx = tx.clone();
    let convert = std::sync::Mutex::new(convert);
    sink.connect("new-sample", false, move |values| {
        let sink = values.first()?.get::<gst::Element>().ok()?;
        let sample = sink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
        let event = match convert.lock() {
            Ok(mut convert) => match (*convert)(&sample) {
                Ok(item) => SinkEvent::Item(item),
                Err(e) => SinkEvent::Error(e),
            },
            Err(_) => SinkEvent::Error("sample converter poisoned".to_string()),
        };
        let _ = sample_tx.send(event);
        Some(gst::FlowReturn::Ok.to_value())
    });

    let eos_tx = tx.clone();
    sink.connect("eos", false, move |_| {
        let _ = eos_tx.send(SinkEvent::Eos);
        None
    });

    if let Some(bus) = pipeline.bus() {
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                let _ = tx.send(SinkEvent::Error(err.error().to_string()));
            }
            gst::BusSyncReply::Drop
        });
    }
    rx
}

/// A running appsrc/appsink pipeline with an in-flight counter.
struct Session<T> {
    pipeline: gst::Pipeline,
    src: gst::Element,
    events: mpsc::UnboundedReceiver<SinkEvent<T>>,
    pending: usize,
    ended: bool,
}

impl<T> Session<T> {
    fn start(&self, name: &str) -> SubforgeResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            SubforgeError::codec(format!("Failed to start {name} pipeline: {e:?}"))
        })?;
        Ok(())
    }

    fn push(&mut self, buffer: gst::Buffer) -> SubforgeResult<()> {
        let flow = self
            .src
            .emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]);
        if flow != gst::FlowReturn::Ok {
            return Err(SubforgeError::codec(format!("appsrc refused buffer: {flow:?}")));
        }
        self.pending += 1;
        Ok(())
    }

    async fn next(&mut self) -> SubforgeResult<Option<T>> {
        if self.pending == 0 || self.ended {
            return Ok(None);
        }
        match self.events.recv().await {
            Some(SinkEvent::Item(item)) => {
                self.pending -= 1;
                Ok(Some(item))
            }
            Some(SinkEvent::Eos) | None => {
                self.ended = true;
                Ok(None)
            }
            Some(SinkEvent::Error(e)) => Err(SubforgeError::codec(e)),
        }
    }

    async fn drain(&mut self) -> SubforgeResult<Vec<T>> {
        if !self.ended {
            let _ = self.src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
        }
        let mut items = Vec::new();
        while !self.ended {
            match self.events.recv().await {
                Some(SinkEvent::Item(item)) => items.push(item),
                Some(SinkEvent::Eos) | None => self.ended = true,
                Some(SinkEvent::Error(e)) => return Err(SubforgeError::codec(e)),
            }
        }
        self.pending = 0;
        Ok(items)
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn sample_frame(sample: &gst::Sample) -> Result<VideoFrame, String> {
    let caps = sample.caps().ok_or("decoded sample has no caps")?;
    let s = caps.structure(0).ok_or("decoded caps are empty")?;
    let width = s.get::<i32>("width").map_err(|e| e.to_string())? as u32;
    let height = s.get::<i32>("height").map_err(|e| e.to_string())? as u32;
    let buffer = sample.buffer().ok_or("decoded sample has no buffer")?;
    let map = buffer.map_readable().map_err(|e| e.to_string())?;
    VideoFrame::from_rgba(
        width,
        height,
        micros(buffer.pts()),
        micros(buffer.duration()),
        map.as_slice().to_vec(),
    )
    .ok_or_else(|| format!("decoded frame is not {width}x{height} RGBA"))
}

pub struct GstDecoder {
    session: Option<Session<VideoFrame>>,
}

#[async_trait]
impl VideoDecoder for GstDecoder {
    fn configure(&mut self, config: &VideoDecoderConfig) -> SubforgeResult<()> {
        let caps = decoder_caps(config).ok_or_else(|| {
            SubforgeError::codec(format!("unsupported decoder codec {}", config.codec))
        })?;
        let (pipeline, src, sink) = launch(
            "appsrc name=src format=time ! decodebin ! videoconvert ! \
             video/x-raw,format=RGBA ! appsink name=sink emit-signals=true sync=false",
        )?;
        src.set_property("caps", &caps);
        let events = connect_sink(&pipeline, &sink, sample_frame);
        let session = Session {
            pipeline,
            src,
            events,
            pending: 0,
            ended: false,
        };
        session.start("decoder")?;
        tracing::debug!(codec = %config.codec, "GStreamer decoder configured");
        self.session = Some(session);
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedVideoChunk) -> SubforgeResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SubforgeError::codec("decoder is not configured"))?;
        let mut buffer = gst::Buffer::from_slice(chunk.data);
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(clock_time(chunk.timestamp_us));
            buffer.set_duration(clock_time(chunk.duration_us));
            if chunk.kind == ChunkKind::Delta {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        session.push(buffer)
    }

    fn decode_queue_size(&self) -> usize {
        self.session.as_ref().map(|s| s.pending).unwrap_or(0)
    }

    async fn next_frame(&mut self) -> SubforgeResult<Option<VideoFrame>> {
        match self.session.as_mut() {
            Some(session) => session.next().await,
            None => Ok(None),
        }
    }

    async fn flush(&mut self) -> SubforgeResult<Vec<VideoFrame>> {
        match self.session.as_mut() {
            Some(session) => session.drain().await,
            None => Ok(Vec::new()),
        }
    }
}

/// Converts encoder samples, attaching the decoder config to the first one.
struct EncodedSampler {
    fourcc: &'static [u8; 4],
    width: u32,
    height: u32,
    sent_config: bool,
}

impl EncodedSampler {
    fn convert(&mut self, sample: &gst::Sample) -> Result<EncodedOutput, String> {
        let buffer = sample.buffer().ok_or("encoded sample has no buffer")?;
        let map = buffer.map_readable().map_err(|e| e.to_string())?;
        let chunk = EncodedVideoChunk {
            kind: if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
                ChunkKind::Delta
            } else {
                ChunkKind::Key
            },
            timestamp_us: micros(buffer.pts()),
            duration_us: micros(buffer.duration()),
            data: Bytes::copy_from_slice(map.as_slice()),
        };

        let metadata = if self.sent_config {
            None
        } else {
            let caps = sample.caps().ok_or("encoded sample has no caps")?;
            let s = caps.structure(0).ok_or("encoded caps are empty")?;
            let record = s
                .get::<gst::Buffer>("codec_data")
                .map_err(|e| format!("encoder output has no codec_data: {e}"))?;
            let record = record.map_readable().map_err(|e| e.to_string())?;
            let codec = if self.fourcc == b"avc1" {
                codec_string::avc(self.fourcc, record.as_slice())
            } else {
                codec_string::hevc(self.fourcc, record.as_slice())
            }
            .map_err(|e| e.to_string())?;
            self.sent_config = true;
            Some(VideoDecoderConfig {
                codec,
                coded_width: self.width,
                coded_height: self.height,
                description: Some(Bytes::copy_from_slice(record.as_slice())),
            })
        };
        Ok(EncodedOutput { chunk, metadata })
    }
}

pub struct GstEncoder {
    session: Option<Session<EncodedOutput>>,
    width: u32,
    height: u32,
}

#[async_trait]
impl VideoEncoder for GstEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> SubforgeResult<()> {
        let (encoder, parser, caps, fourcc) = Family::from_codec(&config.codec)
            .and_then(Family::encoder_chain)
            .ok_or_else(|| {
                SubforgeError::codec(format!("unsupported encoder codec {}", config.codec))
            })?;
        let kbps = (config.bitrate / 1000).max(1);
        let (pipeline, src, sink) = launch(&format!(
            "appsrc name=src format=time ! videoconvert ! \
             {encoder} name=enc tune=zerolatency bitrate={kbps} ! {parser} ! {caps} ! \
             appsink name=sink emit-signals=true sync=false"
        ))?;

        let fps = config.framerate.unwrap_or(30.0).round().max(1.0) as i32;
        let input_caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", config.width as i32)
            .field("height", config.height as i32)
            .field("framerate", gst::Fraction::new(fps, 1))
            .build();
        src.set_property("caps", &input_caps);

        let mut sampler = EncodedSampler {
            fourcc,
            width: config.width,
            height: config.height,
            sent_config: false,
        };
        let events = connect_sink(&pipeline, &sink, move |sample| sampler.convert(sample));
        let session = Session {
            pipeline,
            src,
            events,
            pending: 0,
            ended: false,
        };
        session.start("encoder")?;
        tracing::debug!(codec = %config.codec, encoder, kbps, fps, "GStreamer encoder configured");
        self.width = config.width;
        self.height = config.height;
        self.session = Some(session);
        Ok(())
    }

    fn encode(&mut self, frame: VideoFrame, options: EncodeOptions) -> SubforgeResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SubforgeError::codec("encoder is not configured"))?;
        if frame.width != self.width || frame.height != self.height {
            return Err(SubforgeError::codec(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if options.key_frame {
            let structure = gst::Structure::builder("GstForceKeyUnit")
                .field("timestamp", clock_time(frame.timestamp_us))
                .field("stream-time", clock_time(frame.timestamp_us))
                .field("running-time", clock_time(frame.timestamp_us))
                .field("all-headers", true)
                .field("count", 0u32)
                .build();
            session
                .src
                .send_event(gst::event::CustomDownstream::new(structure));
        }
        let (pts, duration) = (frame.timestamp_us, frame.duration_us);
        let mut buffer = gst::Buffer::from_mut_slice(frame.data);
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(clock_time(pts));
            buffer.set_duration(clock_time(duration));
        }
        session.push(buffer)
    }

    fn encode_queue_size(&self) -> usize {
        self.session.as_ref().map(|s| s.pending).unwrap_or(0)
    }

    async fn next_chunk(&mut self) -> SubforgeResult<Option<EncodedOutput>> {
        match self.session.as_mut() {
            Some(session) => session.next().await,
            None => Ok(None),
        }
    }

    async fn flush(&mut self) -> SubforgeResult<Vec<EncodedOutput>> {
        match self.session.as_mut() {
            Some(session) => session.drain().await,
            None => Ok(Vec::new()),
        }
    }
}

/// Codec platform using installed GStreamer plugins.
#[derive(Debug, Default)]
pub struct GstPlatform;

impl GstPlatform {
    pub fn new() -> SubforgeResult<Self> {
        init_gstreamer()?;
        Ok(Self)
    }
}

#[async_trait]
impl CodecPlatform for GstPlatform {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn is_decoder_supported(&self, config: &VideoDecoderConfig) -> bool {
        let Some(caps) = decoder_caps(config) else {
            return false;
        };
        gst::ElementFactory::factories_with_type(
            gst::ElementFactoryType::DECODER,
            gst::Rank::MARGINAL,
        )
        .iter()
        .any(|factory| factory.can_sink_any_caps(&caps))
    }

    async fn is_encoder_supported(&self, config: &VideoEncoderConfig) -> bool {
        match Family::from_codec(&config.codec).and_then(Family::encoder_chain) {
            Some((encoder, parser, _, _)) => has_element(encoder) && has_element(parser),
            None => false,
        }
    }

    fn create_decoder(&self) -> SubforgeResult<Box<dyn VideoDecoder>> {
        Ok(Box::new(GstDecoder { session: None }))
    }

    fn create_encoder(&self) -> SubforgeResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(GstEncoder {
            session: None,
            width: 0,
            height: 0,
        }))
    }
}
