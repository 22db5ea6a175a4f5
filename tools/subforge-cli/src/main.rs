//! Subforge CLI: burn subtitle cues into videos, locally.
//!
//! Usage:
//!   subforge render <VIDEO> --cues <FILE>   Render a subtitled copy of a video
//!   subforge validate <VIDEO>              Check codec support for a video
//!   subforge probe <VIDEO>                 Show container and track information
//!   subforge cues <TRANSCRIPT>             Convert cues to SRT or VTT
//!   subforge check                         Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "subforge",
    about = "Frame-accurate subtitle burn-in for MP4 videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a copy of a video with subtitles burned in
    Render {
        /// Source MP4 file
        video: PathBuf,

        /// Cue file (JSON, SRT or VTT)
        #[arg(short, long)]
        cues: PathBuf,

        /// Word timings as a JSON array of chunks; enables word animation
        #[arg(long)]
        words: Option<PathBuf>,

        /// Render style as JSON
        #[arg(long)]
        style: Option<PathBuf>,

        /// Output file (defaults to <video>-subtitled.mp4 next to the source)
        #[arg(short, long, conflicts_with = "in_memory")]
        output: Option<PathBuf>,

        /// Render into memory and report the size instead of writing a file
        #[arg(long)]
        in_memory: bool,

        /// Override the font size in pixels
        #[arg(long)]
        font_size: Option<f32>,

        /// Override the text block position as "x,y" in pixels
        #[arg(long)]
        position: Option<String>,
    },

    /// Check whether a video can be decoded and re-encoded
    Validate {
        /// Source MP4 file
        video: PathBuf,
    },

    /// Show container and track information
    Probe {
        /// Source MP4 file
        video: PathBuf,
    },

    /// Convert a transcript or cue file to subtitles
    Cues {
        /// Cue JSON, SRT, VTT, or a JSONL stream of transcript messages
        transcript: PathBuf,

        /// Subtitle format to produce
        #[arg(short, long, value_enum, default_value = "srt")]
        format: SubtitleFormat,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = subforge_common::config::AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    subforge_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Render {
            video,
            cues,
            words,
            style,
            output,
            in_memory,
            font_size,
            position,
        } => {
            commands::render::run(
                &config,
                commands::render::RenderArgs {
                    video,
                    cues,
                    words,
                    style,
                    output,
                    in_memory,
                    font_size,
                    position,
                },
            )
            .await
        }
        Commands::Validate { video } => commands::validate::run(&config, video).await,
        Commands::Probe { video } => commands::probe::run(&config, video),
        Commands::Cues {
            transcript,
            format,
            output,
        } => commands::cues::run(transcript, format, output),
        Commands::Check => commands::check::run(&config).await,
    }
}
