//! Subtitle files in SRT and WebVTT formats.

use std::path::Path;

use subforge_common::error::{SubforgeError, SubforgeResult};

use crate::cue::{export_end, Cue};

/// Generate SRT subtitle content from cues.
pub fn generate_srt(cues: &[Cue]) -> String {
    let mut output = String::new();

    for (i, cue) in cues.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(cue.start()),
            format_srt_time(export_end(cues, i)),
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}

/// Generate WebVTT subtitle content from cues.
pub fn generate_vtt(cues: &[Cue]) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for (i, cue) in cues.iter().enumerate() {
        output.push_str(&format!(
            "{} --> {}\n",
            format_vtt_time(cue.start()),
            format_vtt_time(export_end(cues, i)),
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(secs: f64) -> String {
    let (hours, minutes, seconds, millis) = split_time(secs);
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Format seconds as VTT timestamp: HH:MM:SS.mmm
fn format_vtt_time(secs: f64) -> String {
    let (hours, minutes, seconds, millis) = split_time(secs);
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

fn split_time(secs: f64) -> (u64, u64, u64, u64) {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000,
    )
}

/// Parse `HH:MM:SS,mmm`, `HH:MM:SS.mmm` or `MM:SS.mmm` into seconds.
fn parse_time(raw: &str) -> Option<f64> {
    let raw = raw.trim().replace(',', ".");
    let parts: Vec<&str> = raw.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    let seconds: f64 = seconds.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Parse a `start --> end [settings]` timing line.
fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.split_whitespace().next()?;
    Some((parse_time(start)?, parse_time(end)?))
}

/// Split content into blank-line separated blocks of trimmed lines.
fn blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_blocks(blocks: Vec<Vec<&str>>, format: &str) -> SubforgeResult<Vec<Cue>> {
    let mut cues = Vec::new();
    for block in blocks {
        let Some(timing_at) = block.iter().position(|line| line.contains("-->")) else {
            continue;
        };
        let (start, end) = parse_timing(block[timing_at]).ok_or_else(|| {
            SubforgeError::cue(format!("invalid {format} timing line {:?}", block[timing_at]))
        })?;
        let id = timing_at
            .checked_sub(1)
            .and_then(|i| block[i].trim().parse::<u64>().ok());
        let cue = Cue {
            id,
            text: block[timing_at + 1..].join("\n"),
            timestamp: (start, Some(end)),
        };
        cue.validate()?;
        cues.push(cue);
    }
    Ok(cues)
}

/// Parse SRT content into cues.
pub fn parse_srt(content: &str) -> SubforgeResult<Vec<Cue>> {
    let content = content.trim_start_matches('\u{feff}');
    parse_blocks(blocks(content), "SRT")
}

/// Parse WebVTT content into cues. `NOTE`, `STYLE` and `REGION` blocks are skipped.
pub fn parse_vtt(content: &str) -> SubforgeResult<Vec<Cue>> {
    let content = content.trim_start_matches('\u{feff}');
    if !content.starts_with("WEBVTT") {
        return Err(SubforgeError::cue("missing WEBVTT header"));
    }
    let cue_blocks = blocks(content)
        .into_iter()
        .skip(1)
        .filter(|block| {
            let first = block[0];
            !(first.starts_with("NOTE") || first.starts_with("STYLE") || first.starts_with("REGION"))
        })
        .collect();
    parse_blocks(cue_blocks, "VTT")
}

/// Load cues from a subtitle or JSON file, chosen by extension.
pub fn load_cues(path: &Path) -> SubforgeResult<Vec<Cue>> {
    if !path.exists() {
        return Err(SubforgeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("srt") => parse_srt(&content),
        Some("vtt") => parse_vtt(&content),
        _ => crate::cue::parse_cues_json(&content),
    }
}

/// Save subtitles to a file.
pub fn save_subtitles(cues: &[Cue], path: &Path) -> SubforgeResult<()> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("vtt") => generate_vtt(cues),
        _ => generate_srt(cues), // default to SRT
    };
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_generation() {
        let cues = vec![
            Cue::new("Hello world", 0.0, 2.5),
            Cue::open("This is a test", 3.0),
        ];

        let srt = generate_srt(&cues);
        assert!(srt.contains("1\n00:00:00,000 --> 00:00:02,500\nHello world"));
        assert!(srt.contains("2\n00:00:03,000 --> 00:00:03,500\nThis is a test"));
    }

    #[test]
    fn test_vtt_open_end_uses_next_start() {
        let cues = vec![Cue::open("One minute in", 61.5), Cue::new("later", 63.0, 64.0)];

        let vtt = generate_vtt(&cues);
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:01:01.500 --> 00:01:03.000"));
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3661.5), "01:01:01,500");
        assert_eq!(format_vtt_time(3661.5), "01:01:01.500");
    }

    #[test]
    fn test_parse_srt() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,500\r\nfirst line\r\nsecond line\r\n\r\n2\n00:00:03,000 --> 00:00:04,000\nnext\n";
        let cues = parse_srt(srt).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].id, Some(1));
        assert_eq!(cues[0].text, "first line\nsecond line");
        assert_eq!(cues[0].timestamp, (1.0, Some(2.5)));
    }

    #[test]
    fn test_parse_vtt_skips_notes_and_settings() {
        let vtt = "WEBVTT - demo\n\nNOTE a comment\n\nintro\n00:05.000 --> 00:06.250 align:start\nHi\n";
        let cues = parse_vtt(vtt).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].timestamp, (5.0, Some(6.25)));
        assert_eq!(cues[0].id, None);
        assert!(parse_vtt("00:00.000 --> 00:01.000\nx").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_timing() {
        assert!(parse_srt("1\n00:00:xx,000 --> 00:00:01,000\nbad\n").is_err());
        assert!(parse_srt("1\n00:00:05,000 --> 00:00:01,000\nbackwards\n").is_err());
    }

    #[test]
    fn test_generated_srt_parses_back() {
        let cues = vec![Cue::new("a", 0.25, 1.0), Cue::new("b", 1.5, 2.0)];
        let parsed = parse_srt(&generate_srt(&cues)).unwrap();
        assert_eq!(parsed[1].timestamp, (1.5, Some(2.0)));
    }
}
