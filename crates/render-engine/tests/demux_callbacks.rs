mod common;

use bytes::Bytes;
use common::write_fixture;
use subforge_render_engine::demux::{demux_file, DemuxHandler, Metadata};
use subforge_render_engine::{
    AudioDecoderConfig, ChunkKind, EncodedVideoChunk, VideoDecoderConfig,
};

#[derive(Default)]
struct Recorder {
    configs: usize,
    metadata: Option<Metadata>,
    audio_codec: Option<String>,
    video: Vec<(ChunkKind, i64)>,
    audio: Vec<i64>,
    statuses: Vec<(String, String)>,
    order: Vec<char>,
}

impl DemuxHandler for Recorder {
    fn on_config(
        &mut self,
        _video: &VideoDecoderConfig,
        audio: Option<&AudioDecoderConfig>,
        metadata: &Metadata,
    ) {
        self.configs += 1;
        self.metadata = Some(metadata.clone());
        self.audio_codec = audio.map(|a| a.codec.clone());
        self.order.push('c');
    }

    fn on_video_chunk(&mut self, chunk: EncodedVideoChunk) {
        self.video.push((chunk.kind, chunk.timestamp_us));
        self.order.push('v');
    }

    fn on_raw_audio_chunk(
        &mut self,
        _data: Bytes,
        _kind: ChunkKind,
        timestamp_us: i64,
        _duration_us: i64,
    ) {
        self.audio.push(timestamp_us);
        self.order.push('a');
    }

    fn on_status(&mut self, phase: &str, detail: &str) {
        self.statuses.push((phase.to_string(), detail.to_string()));
    }
}

#[test]
fn callbacks_report_config_once_then_samples_in_storage_order() {
    let source = common::temp_path("callbacks.mp4");
    write_fixture(&source, 320, 240, 20, 25, true);

    let mut recorder = Recorder::default();
    demux_file(&source, 4096, &mut recorder).unwrap();

    assert_eq!(recorder.configs, 1);
    assert_eq!(recorder.order.first(), Some(&'c'));
    assert_eq!(recorder.audio_codec.as_deref(), Some("mp4a.40.2"));

    let metadata = recorder.metadata.unwrap();
    assert_eq!((metadata.width, metadata.height), (320, 240));
    assert_eq!(metadata.sample_count, 20);
    assert!((metadata.duration - 0.8).abs() < 1e-6);

    assert_eq!(recorder.video.len(), 20);
    assert_eq!(recorder.audio.len(), 20);
    let timestamps: Vec<i64> = recorder.video.iter().map(|(_, ts)| *ts).collect();
    assert_eq!(timestamps, (0..20).map(|i| i * 40_000).collect::<Vec<_>>());
    let keys = recorder
        .video
        .iter()
        .filter(|(kind, _)| *kind == ChunkKind::Key)
        .count();
    assert_eq!(keys, 2);

    // The fixture writes each audio sample right after its video sample.
    let interleaved: String = recorder.order[1..].iter().collect();
    assert_eq!(interleaved, "va".repeat(20));
    assert_eq!(
        recorder.statuses.last(),
        Some(&("demux".to_string(), "done".to_string()))
    );
}

#[test]
fn open_failures_are_reported_through_status() {
    let mut recorder = Recorder::default();
    let err = demux_file(&common::temp_path("absent.mp4"), 4096, &mut recorder).unwrap_err();

    assert_eq!(err.stage(), "io");
    assert_eq!(recorder.configs, 0);
    assert_eq!(recorder.statuses.len(), 1);
    assert_eq!(recorder.statuses[0].0, "demux");
}
