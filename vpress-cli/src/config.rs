//! On-disk defaults for the CLI, merged under command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Optional defaults loaded from `<config_dir>/vpress/config.toml`. Every
/// field can be overridden by a flag; a missing file means plain defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: Option<String>,
    /// Directory for compressed outputs.
    pub output_dir: Option<PathBuf>,
    /// Maximum simultaneous compressions.
    pub concurrency: Option<usize>,
    /// Re-encode by default instead of copying streams.
    pub reencode: bool,
    /// Default Constant Rate Factor for re-encoding.
    pub crf: Option<u8>,
    /// Default audio bitrate for re-encoding.
    pub audio_bitrate: Option<String>,
}

impl AppConfig {
    /// Load from `path`, or from the default location when `None`. A file
    /// that doesn't exist yields the defaults; one that exists but doesn't
    /// parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vpress").join("config.toml"))
    }
}
