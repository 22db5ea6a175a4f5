//! Burn subtitles into a video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use subforge_common::config::AppConfig;
use subforge_cue_model::subtitles::load_cues;
use subforge_cue_model::{RenderStyle, StyleAction, StyleStore, WordAnimationData, WordChunk};
use subforge_render_engine::demux::Demuxer;
use subforge_render_engine::overlay::SystemFontFactory;
use subforge_render_engine::target::suggested_filename;
use subforge_render_engine::{
    ProgressKind, RenderPipeline, RenderRequest, RenderWorker, Target, WorkerMessage,
    WorkerRequest,
};

pub struct RenderArgs {
    pub video: PathBuf,
    pub cues: PathBuf,
    pub words: Option<PathBuf>,
    pub style: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub in_memory: bool,
    pub font_size: Option<f32>,
    pub position: Option<String>,
}

fn parse_position(value: &str) -> anyhow::Result<(f32, f32)> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Position must look like \"x,y\", got \"{value}\""))?;
    Ok((x.trim().parse()?, y.trim().parse()?))
}

pub async fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    println!("Rendering subtitles into: {}", args.video.display());

    let cues = load_cues(&args.cues).map_err(|e| anyhow::anyhow!("Failed to load cues: {e}"))?;
    let demuxer = Demuxer::open(&args.video, config.render.read_chunk_bytes)?;
    let (width, height) = {
        let video = &demuxer.config().video;
        (video.coded_width, video.coded_height)
    };
    drop(demuxer);

    let initial = match &args.style {
        Some(path) => RenderStyle::from_json(&std::fs::read_to_string(path)?)
            .map_err(|e| anyhow::anyhow!("Failed to load style: {e}"))?,
        None => RenderStyle::default_for(width, height),
    };
    let mut store = StyleStore::new(initial);
    if let Some(size) = args.font_size {
        store.dispatch(StyleAction::SetFontSize(size));
    }
    if let Some(position) = &args.position {
        let (x, y) = parse_position(position)?;
        store.dispatch(StyleAction::SetPosition { x, y });
    }

    let word_animation = match &args.words {
        Some(path) => {
            let words: Vec<WordChunk> = serde_json::from_str(&std::fs::read_to_string(path)?)
                .map_err(|e| anyhow::anyhow!("Failed to parse word timings: {e}"))?;
            if store.get().word_animation.is_none() {
                store.dispatch(StyleAction::EnableWordAnimation(true));
            }
            Some(WordAnimationData::group(&cues, words))
        }
        None => None,
    };

    let target = if args.in_memory {
        Target::memory()
    } else {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| args.video.with_file_name(suggested_filename(&args.video)));
        println!("  Output: {}", path.display());
        Target::file(path)
    };
    println!("  Resolution: {width}x{height}");
    println!("  Cues: {}", cues.len());

    let pipeline = RenderPipeline::new(
        super::codec_platform()?,
        Arc::new(SystemFontFactory::new(config.fonts.clone())),
        config.render.clone(),
    );
    let mut worker = RenderWorker::spawn(Arc::new(pipeline));
    worker.post(WorkerRequest::Render(RenderRequest {
        source: args.video,
        cues,
        style: Some(store.snapshot()),
        word_animation,
        target,
    }))?;

    while let Some(message) = worker.recv().await {
        match message {
            WorkerMessage::RenderProgress { progress }
            | WorkerMessage::EncodeProgress { progress } => {
                let label = match progress.kind {
                    ProgressKind::Render => "Rendering",
                    ProgressKind::Encode => "Encoding ",
                };
                print!(
                    "\r  {label}: {:.1}% ({}/{} frames)  ",
                    progress.percent, progress.processed, progress.total
                );
                let _ = std::io::stdout().flush();
            }
            WorkerMessage::Done { target, stats } => {
                match target {
                    Target::WrittenFile {
                        path,
                        bytes_written,
                    } => println!(
                        "\nRender complete: {} ({bytes_written} bytes)",
                        path.display()
                    ),
                    Target::PopulatedArrayBuffer { bytes, filename } => println!(
                        "\nRender complete: {filename} ({} bytes in memory)",
                        bytes.len()
                    ),
                    other => println!("\nRender complete: {}", other.kind()),
                }
                println!(
                    "  Frames: {}, audio chunks: {}, time: {:.1}s",
                    stats.frames_decoded, stats.audio_chunks, stats.elapsed_secs
                );
                break;
            }
            WorkerMessage::Error { message, error } => {
                println!("\nRender failed: {message}");
                if error.may_leave_partial_output() {
                    println!("  The output file may be incomplete.");
                }
                worker.shutdown().await;
                return Err(anyhow::anyhow!(message));
            }
            WorkerMessage::Validation(_) => {}
        }
    }

    worker.shutdown().await;
    Ok(())
}
