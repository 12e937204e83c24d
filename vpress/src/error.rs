//! Application-wide error types.

use std::path::PathBuf;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Per-job errors never affect other jobs: the queue releases the job's
/// concurrency slot and keeps draining regardless of which variant ended it.
#[derive(Error, Debug)]
pub enum Error {
    /// The external binary could not be started at all (missing, permission
    /// denied). Nothing was registered as live for the job.
    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The transcoder ran and exited with a failure code. Carries a bounded
    /// excerpt of its diagnostic output; the staged file has been discarded.
    #[error("transcoder exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    /// Transcoding succeeded but the staged file could not be moved onto the
    /// final output path. The staged file has been discarded rather than
    /// left behind.
    #[error("failed to finalize output {}: {source}", .path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
