//! Job types and the per-job event stream.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::progress::ProgressUpdate;

/// Default Constant Rate Factor when re-encoding.
pub const DEFAULT_CRF: u8 = 23;
/// Default audio bitrate when re-encoding.
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Options controlling how a single file is compressed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CompressionOptions {
    /// Re-encode the streams instead of copying them verbatim.
    pub reencode: bool,
    /// Constant Rate Factor for quality-based encoding (lower is better).
    pub crf: Option<u8>,
    /// Audio bitrate (e.g. "128k", "192k").
    pub audio_bitrate: Option<String>,
}

impl CompressionOptions {
    pub fn effective_crf(&self) -> u8 {
        self.crf.unwrap_or(DEFAULT_CRF)
    }

    pub fn effective_audio_bitrate(&self) -> &str {
        self.audio_bitrate.as_deref().unwrap_or(DEFAULT_AUDIO_BITRATE)
    }
}

/// One requested compression.
///
/// The id is caller-supplied and must be unique among jobs that are queued
/// or running at the same time; it keys every progress and cancel request.
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub options: CompressionOptions,
}

impl CompressionJob {
    /// Create a job with default options (stream copy).
    pub fn new(
        id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            options: CompressionOptions::default(),
        }
    }

    /// Set the compression options.
    pub fn with_options(mut self, options: CompressionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Lifecycle of a job as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a free concurrency slot.
    Queued,
    /// The external process is running.
    Running,
    /// Output finalized at its requested path.
    Completed,
    /// The job failed (or was killed by a cancel request).
    Failed,
    /// Relabeled by the caller from a failure it asked for.
    Cancelled,
}

/// Events delivered on a job's channel.
///
/// Any number of `Progress` events, then exactly one terminal `Completed`
/// or `Failed`. The channel closes after the terminal event.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Point-in-time progress snapshot. Best-effort: snapshots may be
    /// dropped when the consumer is slow.
    Progress(ProgressUpdate),
    /// The output now exists at its requested path.
    Completed { output_path: PathBuf },
    /// The job is over without an output. A run killed by `cancel` also
    /// lands here; callers that want a distinct "cancelled" label must track
    /// which ids they cancelled.
    Failed { message: String },
}
