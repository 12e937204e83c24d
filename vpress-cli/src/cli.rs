//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// Compress video files through a bounded queue of ffmpeg processes.
#[derive(Debug, Parser)]
#[command(name = "vpress", version, about)]
pub struct Args {
    /// Video files to compress.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for compressed outputs (defaults to each input's
    /// directory).
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Re-encode the streams (libx264/aac) instead of copying them
    /// verbatim.
    #[arg(long)]
    pub reencode: bool,

    /// Constant Rate Factor for re-encoding; lower is better quality.
    #[arg(long)]
    pub crf: Option<u8>,

    /// Audio bitrate for re-encoding, e.g. "128k".
    #[arg(long)]
    pub audio_bitrate: Option<String>,

    /// Maximum simultaneous compressions (defaults to half the logical
    /// processors).
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Path to the ffmpeg binary.
    #[arg(long, env = "FFMPEG_PATH")]
    pub ffmpeg: Option<String>,

    /// Path to an alternate config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
