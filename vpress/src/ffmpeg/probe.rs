//! Media metadata probe built on ffmpeg's inspection output.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use super::clock_to_ms;
use crate::{Error, Result};

static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*(\d{1,2}):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

/// Metadata extracted from a media file. Both fields are best-effort: a
/// probe that finds neither duration nor size is still a successful probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// Playback duration in milliseconds, when the inspection output
    /// carried one.
    pub duration_ms: Option<u64>,
    /// File size in bytes, when the file could be stat'ed.
    pub size: Option<u64>,
}

/// Probes media files by scanning ffmpeg's diagnostic output.
#[derive(Debug, Clone)]
pub struct Prober {
    ffmpeg_path: String,
}

impl Prober {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Inspect `path` for duration and size.
    ///
    /// Only a failure to launch the binary is an error; ffmpeg exits
    /// non-zero for a bare `-i` inspection and that is expected.
    pub async fn probe(&self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        let path = path.as_ref();

        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-i"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::ProcessLaunch {
                program: self.ffmpeg_path.clone(),
                source: e,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let duration_ms = parse_duration_ms(&stderr);

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat file during probe");
                None
            }
        };

        debug!(path = %path.display(), ?duration_ms, ?size, "probe finished");
        Ok(MediaInfo { duration_ms, size })
    }
}

/// Scan diagnostic text for a `Duration: HH:MM:SS[.fraction]` marker and
/// convert it to milliseconds. The fraction is a decimal fraction of a
/// second (`.50` is 500ms).
pub fn parse_duration_ms(text: &str) -> Option<u64> {
    let caps = DURATION_REGEX.captures(text)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(clock_to_ms(hours, minutes, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_with_fraction() {
        assert_eq!(
            parse_duration_ms("  Duration: 01:02:03.50, start: 0.000000, bitrate: 4207 kb/s"),
            Some(3_723_500)
        );
    }

    #[test]
    fn test_parse_duration_without_fraction() {
        assert_eq!(parse_duration_ms("Duration: 00:00:10"), Some(10_000));
    }

    #[test]
    fn test_parse_duration_absent() {
        assert_eq!(parse_duration_ms("Stream #0:0: Video: h264"), None);
        assert_eq!(parse_duration_ms(""), None);
    }

    #[test]
    fn test_parse_duration_in_realistic_banner() {
        let text = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n\
                    \x20 Metadata:\n\
                    \x20   major_brand     : isom\n\
                    \x20 Duration: 00:01:30.04, start: 0.000000, bitrate: 1402 kb/s\n\
                    \x20   Stream #0:0[0x1](und): Video: h264";
        assert_eq!(parse_duration_ms(text), Some(90_040));
    }
}
