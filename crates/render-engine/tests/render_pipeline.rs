mod common;

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use common::{write_fixture, FakePlatform, RecordingFonts};
use subforge_common::error::SubforgeError;
use subforge_cue_model::{Cue, RenderStyle, WordAnimationData, WordAnimationStyle, WordChunk};
use subforge_render_engine::demux::Demuxer;
use subforge_render_engine::{
    ProgressCallback, ProgressKind, RenderProgress, RenderRequest, RenderWorker, Target,
    WorkerMessage, WorkerRequest,
};

fn request(source: std::path::PathBuf, cues: Vec<Cue>, target: Target) -> RenderRequest {
    RenderRequest {
        source,
        cues,
        style: None,
        word_animation: None,
        target,
    }
}

/// "world" has no end and stays up until the stream ends.
fn hello_world() -> Vec<Cue> {
    vec![Cue::new("hello", 0.0, 2.0), Cue::open("world", 2.0)]
}

#[tokio::test]
async fn burns_cues_into_every_frame_and_keeps_audio() {
    let source = common::temp_path("clip.mp4");
    write_fixture(&source, 1280, 720, 100, 10, true);

    let platform = Arc::new(FakePlatform::new());
    let fonts = Arc::new(RecordingFonts::default());
    let pipeline = common::pipeline(platform.clone(), fonts.clone());

    let reports: Arc<Mutex<Vec<RenderProgress>>> = Arc::default();
    let sink = reports.clone();
    let progress: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p));

    let output = pipeline
        .render(
            request(source.clone(), hello_world(), Target::memory()),
            Some(progress),
        )
        .await
        .expect("render should succeed");

    assert_eq!(output.stats.video_samples, 100);
    assert_eq!(output.stats.frames_decoded, 100);
    assert_eq!(output.stats.chunks_encoded, 100);
    assert_eq!(output.stats.audio_chunks, 100);
    assert_eq!(output.encoder.codec, "avc1.42E01E");
    assert_eq!((output.encoder.width, output.encoder.height), (1280, 720));

    let draws = fonts.draws.lock().unwrap().clone();
    assert_eq!(draws.len(), 100);
    for (ts, text) in &draws {
        let expected = if *ts < 2_000_000 { "hello" } else { "world" };
        assert_eq!(text, expected, "frame at {ts}us");
    }
    let drawn_at = |ts: i64| {
        draws
            .iter()
            .find(|(t, _)| *t == ts)
            .map(|(_, text)| text.as_str())
    };
    assert_eq!(drawn_at(1_000_000), Some("hello"));
    assert_eq!(drawn_at(5_000_000), Some("world"));
    assert_eq!(drawn_at(9_900_000), Some("world"));

    let log = platform.log.lock().unwrap();
    assert_eq!(log.fed_while_encoding, 0);
    assert_eq!(log.encoded.iter().filter(|(_, key)| *key).count(), 1);
    assert!(log.encoded[0].1);
    let decoded_in_order = log.decoded.windows(2).all(|w| w[0] < w[1]);
    assert!(decoded_in_order);

    let reports = reports.lock().unwrap();
    let last_render = reports
        .iter()
        .filter(|p| p.kind == ProgressKind::Render)
        .last()
        .unwrap();
    assert_eq!(last_render.processed, 100);
    assert_eq!(last_render.percent, 100.0);
    assert!(reports.iter().any(|p| p.kind == ProgressKind::Encode));

    let (bytes, filename) = match output.target {
        Target::PopulatedArrayBuffer { bytes, filename } => (bytes, filename),
        other => panic!("unexpected target {other:?}"),
    };
    assert_eq!(filename, "clip-subtitled.mp4");

    let demuxer = Demuxer::new(Cursor::new(bytes)).expect("output should demux");
    let config = demuxer.config();
    assert_eq!(config.video.codec, "avc1.42E01E");
    assert_eq!(config.metadata.sample_count, 100);
    assert!((config.metadata.duration - 10.0).abs() < 1e-6);
    let audio = config.audio.as_ref().expect("audio should pass through");
    assert_eq!(audio.codec, "mp4a.40.2");
    assert_eq!(audio.sample_rate, 48_000);
}

#[tokio::test]
async fn decoder_queue_never_exceeds_queue_size() {
    let source = common::temp_path("long.mp4");
    write_fixture(&source, 160, 90, 130, 25, false);

    let platform = Arc::new(FakePlatform::new());
    let pipeline = common::pipeline(platform.clone(), Arc::default());

    let output = pipeline
        .render(
            request(source, vec![Cue::open("always", 0.0)], Target::memory()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(output.stats.frames_decoded, 130);
    assert!(output.stats.decode_batches >= 2);
    assert!(output.stats.max_decode_queue <= 64);
    assert_eq!(output.stats.audio_chunks, 0);

    let log = platform.log.lock().unwrap();
    assert!(log.max_decode_pending <= 64);
    assert_eq!(log.max_decode_pending, 64);
    let encoded: Vec<i64> = log.encoded.iter().map(|(ts, _)| *ts).collect();
    assert_eq!(encoded, log.decoded);
}

#[tokio::test]
async fn validation_creates_no_codecs() {
    let source = common::temp_path("validate.mp4");
    write_fixture(&source, 640, 360, 5, 25, false);

    let platform = Arc::new(FakePlatform {
        encodable: false,
        ..FakePlatform::new()
    });
    let pipeline = common::pipeline(platform.clone(), Arc::default());

    let report = pipeline.validate(&source).await.unwrap();
    assert_eq!(report.source_codec, "avc1.42E01E");
    assert_eq!((report.width, report.height), (640, 360));
    assert!(report.decoder_supported);
    assert!(!report.encoder_supported);

    let log = platform.log.lock().unwrap();
    assert_eq!(log.decoders_created, 0);
    assert_eq!(log.encoders_created, 0);
}

#[tokio::test]
async fn falls_back_to_h264_when_source_codec_is_not_encodable() {
    let source = common::temp_path("fallback.mp4");
    write_fixture(&source, 640, 360, 5, 25, false);

    let platform = Arc::new(FakePlatform {
        encodable: false,
        ..FakePlatform::new()
    });
    let pipeline = common::pipeline(platform.clone(), Arc::default());

    let output = pipeline
        .render(request(source, Vec::new(), Target::memory()), None)
        .await
        .unwrap();

    assert!(output.encoder.codec.starts_with("avc1."));
    assert_eq!(
        platform.log.lock().unwrap().encoder_config.as_ref(),
        Some(&output.encoder)
    );
    assert_eq!(output.stats.chunks_encoded, 5);
}

#[tokio::test]
async fn invalid_cues_fail_before_any_codec_exists() {
    let source = common::temp_path("badcues.mp4");
    write_fixture(&source, 320, 240, 3, 25, false);

    let platform = Arc::new(FakePlatform::new());
    let pipeline = common::pipeline(platform.clone(), Arc::default());

    let err = pipeline
        .render(
            request(source, vec![Cue::new("backwards", 2.0, 1.0)], Target::memory()),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.stage(), "cues");
    assert_eq!(platform.log.lock().unwrap().decoders_created, 0);
}

#[tokio::test]
async fn file_target_is_written() {
    let source = common::temp_path("tofile.mp4");
    write_fixture(&source, 320, 240, 10, 25, true);
    let out_path = common::temp_path("out/tofile-subtitled.mp4");

    let pipeline = common::pipeline(Arc::new(FakePlatform::new()), Arc::default());
    let output = pipeline
        .render(
            request(source, hello_world(), Target::file(&out_path)),
            None,
        )
        .await
        .unwrap();

    match output.target {
        Target::WrittenFile {
            path,
            bytes_written,
        } => {
            assert_eq!(path, out_path);
            assert_eq!(bytes_written, std::fs::metadata(&out_path).unwrap().len());
        }
        other => panic!("unexpected target {other:?}"),
    }
    let demuxer = Demuxer::open(&out_path, 1 << 16).unwrap();
    assert_eq!(demuxer.metadata().sample_count, 10);
}

#[tokio::test]
async fn word_mode_focuses_the_spoken_word() {
    let source = common::temp_path("words.mp4");
    write_fixture(&source, 640, 360, 20, 10, false);

    let cues = vec![Cue::new("hello world", 0.0, 2.0)];
    let words = vec![
        WordChunk::new("hello", 0.0, 1.0),
        WordChunk::new("world", 1.0, 2.0),
    ];
    let mut style = RenderStyle::default_for(640, 360);
    style.word_animation = Some(WordAnimationStyle::default());

    let fonts = Arc::new(RecordingFonts::default());
    let pipeline = common::pipeline(Arc::new(FakePlatform::new()), fonts.clone());
    pipeline
        .render(
            RenderRequest {
                source,
                word_animation: Some(WordAnimationData::group(&cues, words)),
                cues,
                style: Some(style),
                target: Target::memory(),
            },
            None,
        )
        .await
        .unwrap();

    let draws = fonts.draws.lock().unwrap().clone();
    let last_draw_at = |ts: i64| {
        draws
            .iter()
            .filter(|(t, _)| *t == ts)
            .last()
            .map(|(_, text)| text.clone())
    };
    assert_eq!(last_draw_at(500_000).as_deref(), Some("hello"));
    assert_eq!(last_draw_at(1_500_000).as_deref(), Some("world"));
    assert_eq!(draws.iter().filter(|(t, _)| *t == 500_000).count(), 2);
}

#[tokio::test]
async fn worker_reports_progress_then_done() {
    let source = common::temp_path("worker.mp4");
    write_fixture(&source, 320, 240, 8, 25, false);

    let pipeline = Arc::new(common::pipeline(
        Arc::new(FakePlatform::new()),
        Arc::default(),
    ));
    let mut worker = RenderWorker::spawn(pipeline);
    worker
        .post(WorkerRequest::Render(request(
            source,
            hello_world(),
            Target::memory(),
        )))
        .unwrap();

    let mut messages = Vec::new();
    while let Some(message) = worker.recv().await {
        let done = message.is_final();
        messages.push(message);
        if done {
            break;
        }
    }

    assert!(messages
        .iter()
        .any(|m| matches!(m, WorkerMessage::RenderProgress { .. })));
    assert!(messages
        .iter()
        .any(|m| matches!(m, WorkerMessage::EncodeProgress { .. })));
    match messages.last() {
        Some(WorkerMessage::Done { target, stats }) => {
            assert!(target.is_terminal());
            assert_eq!(stats.frames_decoded, 8);
        }
        other => panic!("unexpected final message {other:?}"),
    }

    worker
        .post(WorkerRequest::Validate {
            source: common::temp_path("missing.mp4"),
        })
        .unwrap();
    match worker.recv().await {
        Some(WorkerMessage::Error { message, error }) => {
            assert!(message.starts_with("io failed"));
            assert!(matches!(error, SubforgeError::FileNotFound { .. }));
        }
        other => panic!("unexpected message {other:?}"),
    }

    worker.shutdown().await;
}
