//! vpress: queue-driven video compression on top of an external ffmpeg.
//!
//! The crate is organized around one data flow: callers submit jobs to the
//! [`CompressionQueue`], which starts them under a concurrency limit and
//! hands each to the [`ProcessSupervisor`]; the supervisor spawns the
//! transcoder, routes its two output streams through the progress parsers,
//! and finalizes the output atomically (staged temp file, then rename).
//! Progress flows back per job as a stream of [`JobEvent`]s, which the
//! [`estimator`] turns into a percentage and a smoothed time remaining.
//!
//! Queue and job state live in memory only; nothing survives the process.

pub mod config;
pub mod error;
pub mod estimator;
pub mod ffmpeg;
pub mod job;
pub mod progress;
pub mod queue;

pub use config::EncoderConfig;
pub use error::{Error, Result};
pub use ffmpeg::{MediaInfo, Prober, ProcessSupervisor};
pub use job::{CompressionJob, CompressionOptions, JobEvent, JobStatus};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use queue::CompressionQueue;
