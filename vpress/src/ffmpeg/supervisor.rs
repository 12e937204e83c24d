//! Lifecycle of one external transcoder invocation per job: argument
//! construction, temp-file staging, stream wiring, exit interpretation, and
//! atomic finalize-or-rollback of the output file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parser::{ProgressParser, scan_time_marker};
use crate::job::{CompressionJob, CompressionOptions};
use crate::progress::ProgressReporter;
use crate::{Error, Result};

/// Stderr kept for diagnostics stops growing past this point.
const STDERR_CAP: usize = 4096;
/// Failure reports carry at most this much of the captured stderr.
const STDERR_EXCERPT: usize = 1000;

/// Supervises the external processes of running jobs.
///
/// Owns the live-cancellation and temp-path maps exclusively; the queue
/// never reaches into them, it only issues run/cancel requests. Every entry
/// is removed exactly once, on whichever of finalize/failure/cancel observes
/// the job's end first.
pub struct ProcessSupervisor {
    ffmpeg_path: String,
    /// Cancellation handle per running job, registered before spawn.
    live: DashMap<String, CancellationToken>,
    /// Staged output path per job.
    temp_paths: DashMap<String, PathBuf>,
}

impl ProcessSupervisor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            live: DashMap::new(),
            temp_paths: DashMap::new(),
        }
    }

    /// Run one job to completion, reporting progress along the way.
    ///
    /// On success the output exists at the job's requested path and the
    /// staged file is gone; on any failure the staged file is discarded and
    /// a pre-existing file at the output path is left untouched. The final
    /// progress flush is attempted before this returns.
    pub async fn run(&self, job: &CompressionJob, progress: &ProgressReporter) -> Result<PathBuf> {
        // Registered before spawn so a cancel racing the submission can
        // always find the job.
        let token = CancellationToken::new();
        self.live.insert(job.id.clone(), token.clone());

        let temp_path = derive_temp_path(&job.output_path);
        self.temp_paths.insert(job.id.clone(), temp_path.clone());

        let args = build_args(&job.input_path, &temp_path, &job.options);
        debug!(id = %job.id, ?args, "spawning transcoder");

        let mut child = match Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.live.remove(&job.id);
                // Nothing has been written yet; only the bookkeeping goes.
                self.temp_paths.remove(&job.id);
                return Err(Error::ProcessLaunch {
                    program: self.ffmpeg_path.clone(),
                    source: e,
                });
            }
        };

        // Structured progress arrives on stdout, diagnostics (with the
        // occasional time= marker) on stderr. Both must be drained
        // concurrently with wait() or the child can block on a full pipe.
        let stdout_task = child.stdout.take().map(|mut stdout| {
            let progress = progress.clone();
            tokio::spawn(async move {
                let mut parser = ProgressParser::new();
                let mut buf = [0u8; 4096];
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]);
                            if let Some(update) = parser.push(&chunk) {
                                progress.report(update);
                            }
                        }
                    }
                }
                if let Some(update) = parser.finish() {
                    progress.report(update);
                }
            })
        });

        let stderr_task = child.stderr.take().map(|mut stderr| {
            let progress = progress.clone();
            tokio::spawn(async move {
                let mut captured = String::new();
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]);
                            if let Some(update) = scan_time_marker(&chunk) {
                                progress.report(update);
                            }
                            if captured.len() < STDERR_CAP {
                                captured.push_str(&chunk);
                            }
                        }
                    }
                }
                captured
            })
        });

        let status_res = tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                info!(id = %job.id, "cancellation requested, killing transcoder");
                if let Err(e) = child.start_kill() {
                    warn!(id = %job.id, error = %e, "failed to signal transcoder");
                }
                child.wait().await
            }
        };

        // Join the readers so the last flush attempt happens before any
        // terminal report.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let captured_stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        self.live.remove(&job.id);

        let status = match status_res {
            Ok(status) => status,
            Err(e) => {
                self.discard_temp(&job.id).await;
                return Err(e.into());
            }
        };

        if status.success() {
            match finalize_output(&temp_path, &job.output_path).await {
                Ok(()) => {
                    self.temp_paths.remove(&job.id);
                    info!(id = %job.id, output = %job.output_path.display(), "output finalized");
                    Ok(job.output_path.clone())
                }
                Err(e) => {
                    self.discard_temp(&job.id).await;
                    Err(Error::Finalize {
                        path: job.output_path.clone(),
                        source: e,
                    })
                }
            }
        } else {
            self.discard_temp(&job.id).await;
            let excerpt: String = captured_stderr.chars().take(STDERR_EXCERPT).collect();
            Err(Error::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr: excerpt,
            })
        }
    }

    /// Request termination of a running job, or drop leftover staging state
    /// for one that is not running. Advisory-immediate: the temp file of a
    /// running job is removed when its exit is observed, not here. Unknown
    /// ids are a no-op.
    pub fn cancel(&self, id: &str) {
        if let Some(token) = self.live.get(id) {
            token.cancel();
            return;
        }
        if let Some((_, path)) = self.temp_paths.remove(id) {
            debug!(id, path = %path.display(), "dropping staged file for inactive job");
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(id, path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }

    /// Drop a job's staging state, deleting the staged file. Removal
    /// failures are logged and swallowed; a leftover temp file is an
    /// acceptable degraded state.
    async fn discard_temp(&self, id: &str) {
        if let Some((_, path)) = self.temp_paths.remove(id) {
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(id, path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

/// Staging path colocated with the final output so the finalize rename
/// never crosses filesystems: `<stem>.tmp-<token><ext>`, unique per
/// invocation even when concurrent jobs target similar names.
fn derive_temp_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = output_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = format!("{stem}.tmp-{}{ext}", uuid::Uuid::new_v4());
    match output_path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Build the transcoder's argument list: machine-parseable progress on
/// stdout, then either verbatim stream copy or re-encoding per the options,
/// writing to the staged path with overwrite.
fn build_args(input: &Path, temp: &Path, options: &CompressionOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];
    if options.reencode {
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            options.effective_crf().to_string(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            options.effective_audio_bitrate().to_string(),
        ]);
    } else {
        args.extend(["-c:v".into(), "copy".into(), "-c:a".into(), "copy".into()]);
    }
    args.push("-y".into());
    args.push(temp.to_string_lossy().into_owned());
    args
}

/// Move the staged file onto the final path, creating the destination
/// directory first and overwriting any existing file. A rename that fails
/// (e.g. across devices) falls back to copy-and-remove.
async fn finalize_output(temp: &Path, output: &Path) -> std::io::Result<()> {
    if let Some(dir) = output.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    match tokio::fs::rename(temp, output).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(error = %rename_err, "rename failed, falling back to copy");
            tokio::fs::copy(temp, output).await?;
            tokio::fs::remove_file(temp).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_pair(args: &[String], first: &str, second: &str) -> bool {
        args.windows(2).any(|w| w[0] == first && w[1] == second)
    }

    #[test]
    fn test_temp_path_shares_directory_and_extension() {
        let temp = derive_temp_path(Path::new("/videos/out/clip-compressed.mp4"));
        assert_eq!(temp.parent(), Some(Path::new("/videos/out")));
        assert_eq!(temp.extension().unwrap(), "mp4");
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("clip-compressed.tmp-"));
    }

    #[test]
    fn test_temp_path_unique_per_invocation() {
        let output = Path::new("/videos/clip.mp4");
        assert_ne!(derive_temp_path(output), derive_temp_path(output));
    }

    #[test]
    fn test_temp_path_without_extension() {
        let temp = derive_temp_path(Path::new("/videos/clip"));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("clip.tmp-"));
        assert!(!name.ends_with('.'));
    }

    #[test]
    fn test_build_args_copy_mode() {
        let args = build_args(
            Path::new("/in.mp4"),
            Path::new("/out/in.tmp-x.mp4"),
            &CompressionOptions::default(),
        );
        assert_eq!(args[0], "-hide_banner");
        assert!(has_pair(&args, "-progress", "pipe:1"));
        assert!(has_pair(&args, "-i", "/in.mp4"));
        assert!(has_pair(&args, "-c:v", "copy"));
        assert!(has_pair(&args, "-c:a", "copy"));
        assert!(!args.contains(&"-crf".to_string()));
        // Overwrite flag immediately precedes the staged output path.
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args[args.len() - 1], "/out/in.tmp-x.mp4");
    }

    #[test]
    fn test_build_args_reencode_defaults() {
        let options = CompressionOptions {
            reencode: true,
            ..Default::default()
        };
        let args = build_args(Path::new("/in.mp4"), Path::new("/tmp.mp4"), &options);
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-preset", "medium"));
        assert!(has_pair(&args, "-crf", "23"));
        assert!(has_pair(&args, "-c:a", "aac"));
        assert!(has_pair(&args, "-b:a", "128k"));
    }

    #[test]
    fn test_build_args_reencode_overrides() {
        let options = CompressionOptions {
            reencode: true,
            crf: Some(30),
            audio_bitrate: Some("96k".to_string()),
        };
        let args = build_args(Path::new("/in.mp4"), Path::new("/tmp.mp4"), &options);
        assert!(has_pair(&args, "-crf", "30"));
        assert!(has_pair(&args, "-b:a", "96k"));
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let supervisor = ProcessSupervisor::new("ffmpeg");
        supervisor.cancel("no-such-job");
    }

    #[tokio::test]
    async fn test_finalize_moves_and_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp = dir.path().join("clip.tmp-abc.mp4");
        let output = dir.path().join("nested").join("clip.mp4");
        tokio::fs::write(&temp, b"new contents").await.unwrap();

        finalize_output(&temp, &output).await.unwrap();
        assert!(!temp.exists());
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"new contents");

        // A second finalize over the same destination overwrites it.
        let temp2 = dir.path().join("clip.tmp-def.mp4");
        tokio::fs::write(&temp2, b"newer").await.unwrap();
        finalize_output(&temp2, &output).await.unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"newer");
    }
}
