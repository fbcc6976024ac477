use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::export::ExportPreset;
use crate::media::TimeRange;

#[derive(Parser)]
#[command(
    name = "stitchcast",
    about = "Stitchcast - clip, stitch and publish videos",
    version,
    long_about = "A CLI tool that cuts time ranges out of a source video, stitches them into a new clip with ffmpeg, uploads the result through pre-signed storage slots and hands the public URL to a transcription or publish API."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format of the run report
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Override endpoints.slot_base_url from the config file
    #[arg(long, env = "STITCHCAST_SLOT_BASE_URL", value_name = "URL", global = true)]
    pub slot_base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stitch time ranges of a video into a new file
    Stitch {
        /// Source video file
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Time range in seconds, repeat to append more (e.g. -r 2.3-17 -r 40-45.9)
        #[arg(short = 'r', long = "range", value_name = "START-END", required = true)]
        ranges: Vec<TimeRange>,

        /// Output file path (kept in the export directory if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Export preset (defaults to export.preset from the config)
        #[arg(short, long, value_enum)]
        preset: Option<ExportPreset>,
    },

    /// Stitch, upload and publish a video by URL
    Publish {
        /// Source video file
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Time range in seconds, repeat to append more
        #[arg(short = 'r', long = "range", value_name = "START-END", required = true)]
        ranges: Vec<TimeRange>,

        /// Post title
        #[arg(short, long)]
        title: Option<String>,

        /// Privacy level (e.g. SELF_ONLY, PUBLIC_TO_EVERYONE)
        #[arg(long, value_name = "LEVEL")]
        privacy: Option<String>,

        /// Cover frame timestamp in milliseconds
        #[arg(long, value_name = "MS")]
        cover_ms: Option<u64>,
    },

    /// Stitch, upload audio and video and request a transcription
    Transcribe {
        /// Source video file
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Time range in seconds, repeat to append more
        #[arg(short = 'r', long = "range", value_name = "START-END", required = true)]
        ranges: Vec<TimeRange>,
    },

    /// Upload an existing mp4/m4a file and print its public URL
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show what the authenticated creator may post
    CreatorInfo,

    /// Show the authenticated user's profile
    Profile,

    /// Manage the stored access token
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },

    /// Write or show the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Store an access token
    Set {
        #[arg(value_name = "TOKEN")]
        token: String,
    },
    /// Show whether a token is stored
    Show,
    /// Remove the stored token
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable summary
    Text,
    /// JSON run report
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_stitch_ranges() {
        let cli = Cli::try_parse_from([
            "stitchcast", "stitch", "in.mov", "-r", "2.3-17", "--range", "40-45.91", "-p", "low",
        ])
        .unwrap();

        match cli.command {
            Commands::Stitch { source, ranges, output, preset } => {
                assert_eq!(source, PathBuf::from("in.mov"));
                assert_eq!(ranges.len(), 2);
                assert_eq!(ranges[1].end().as_seconds(), 45.91);
                assert!(output.is_none());
                assert_eq!(preset, Some(ExportPreset::Low));
            }
            _ => panic!("expected stitch"),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_rejects_inverted_range() {
        assert!(Cli::try_parse_from(["stitchcast", "stitch", "in.mov", "-r", "5-2"]).is_err());
    }

    #[test]
    fn test_requires_a_range() {
        assert!(Cli::try_parse_from(["stitchcast", "publish", "in.mov"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stitchcast", "token", "show", "--format", "json", "-q"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Token { action: TokenCommand::Show }));
    }
}
