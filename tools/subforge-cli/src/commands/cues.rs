//! Convert cues to subtitle files.

use std::path::{Path, PathBuf};

use subforge_cue_model::subtitles::{generate_srt, generate_vtt, load_cues};
use subforge_cue_model::{sort_cues, validate_cues, Cue, TranscriptMessage, TranscriptState};

use crate::SubtitleFormat;

/// Fold a JSONL stream of transcript messages into its final cue list.
fn read_transcript_stream(path: &Path) -> anyhow::Result<Vec<Cue>> {
    let content = std::fs::read_to_string(path)?;
    let mut state = TranscriptState::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: TranscriptMessage = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("Line {}: invalid transcript message: {e}", number + 1))?;
        state.apply(message);
    }
    if !state.is_complete() {
        tracing::warn!(path = %path.display(), "Transcript stream never completed");
    }
    Ok(state.cues().to_vec())
}

pub fn run(
    transcript: PathBuf,
    format: SubtitleFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut cues = match transcript.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => read_transcript_stream(&transcript)?,
        _ => load_cues(&transcript).map_err(|e| anyhow::anyhow!("Failed to load cues: {e}"))?,
    };
    sort_cues(&mut cues);
    validate_cues(&cues)?;

    let content = match format {
        SubtitleFormat::Srt => generate_srt(&cues),
        SubtitleFormat::Vtt => generate_vtt(&cues),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, content)?;
            eprintln!("Wrote {} cue(s) to {}", cues.len(), path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}
