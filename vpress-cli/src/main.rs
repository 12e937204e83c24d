mod cli;
mod config;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use uuid::Uuid;
use vpress::{
    CompressionJob, CompressionOptions, CompressionQueue, EncoderConfig, JobEvent, JobStatus,
    MediaInfo, Prober, estimator::EtaTracker,
};

use crate::{cli::Args, config::AppConfig};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config = AppConfig::load(args.config.as_deref())?;

    let mut encoder = EncoderConfig::new();
    if let Some(path) = args.ffmpeg.clone().or_else(|| config.ffmpeg_path.clone()) {
        encoder = encoder.with_ffmpeg_path(path);
    }
    if let Some(n) = args.concurrency.or(config.concurrency) {
        encoder = encoder.with_concurrency(n);
    }

    let options = CompressionOptions {
        reencode: args.reencode || config.reencode,
        crf: args.crf.or(config.crf),
        audio_bitrate: args
            .audio_bitrate
            .clone()
            .or_else(|| config.audio_bitrate.clone()),
    };

    let output_dir = args.output_dir.clone().or_else(|| config.output_dir.clone());
    if let Some(dir) = &output_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let prober = Prober::new(encoder.ffmpeg_path.clone());
    let queue = CompressionQueue::new(encoder);
    let cancelled: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:>24} [{bar:32}] {percent:>3}% {msg}")
        .unwrap()
        .progress_chars("=> ");

    let mut ids = Vec::new();
    let mut waiters = Vec::new();

    for input in &args.inputs {
        let info = prober
            .probe(input)
            .await
            .with_context(|| format!("probing {}", input.display()))?;

        let output = output_path_for(input, output_dir.as_deref());
        let id = Uuid::new_v4().to_string();
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());

        info!(id = %id, input = %input.display(), output = %output.display(), "queueing");
        let rx = queue.submit(
            CompressionJob::new(id.clone(), input.clone(), output).with_options(options.clone()),
        );

        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bar.set_prefix(file_name.clone());
        bar.set_message("queued");

        ids.push(id.clone());
        waiters.push(tokio::spawn(drive_job(
            id,
            file_name,
            info,
            rx,
            bar,
            Arc::clone(&cancelled),
        )));
    }

    // Ctrl-C cancels everything still in flight; already-finalized outputs
    // are not rolled back.
    {
        let queue = queue.clone();
        let ids = ids.clone();
        let cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancelled.lock().unwrap().extend(ids.iter().cloned());
                for id in &ids {
                    queue.cancel(id);
                }
            }
        });
    }

    let mut summaries = Vec::new();
    for waiter in waiters {
        summaries.push(waiter.await.context("progress task failed")?);
    }

    print_summary(&summaries);

    let failed = summaries
        .iter()
        .filter(|s| s.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} job(s) failed");
    }
    Ok(())
}

struct JobSummary {
    file_name: String,
    status: JobStatus,
    message: Option<String>,
    input_size: Option<u64>,
    output_size: Option<u64>,
}

/// Consume one job's event stream, feeding the progress bar and ETA.
async fn drive_job(
    id: String,
    file_name: String,
    info: MediaInfo,
    mut rx: tokio::sync::mpsc::Receiver<JobEvent>,
    bar: ProgressBar,
    cancelled: Arc<Mutex<HashSet<String>>>,
) -> JobSummary {
    let mut tracker = EtaTracker::new(info.duration_ms);

    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::Progress(update) => {
                if !tracker.update(update.out_time_ms) {
                    continue;
                }
                if let Some(percent) = tracker.percent() {
                    bar.set_position(percent as u64);
                }
                match tracker.eta() {
                    Some(eta) => bar.set_message(format!("eta {}", format_eta(eta))),
                    None => bar.set_message("compressing"),
                }
            }
            JobEvent::Completed { output_path } => {
                tracker.complete();
                bar.set_position(100);
                let output_size = tokio::fs::metadata(&output_path).await.ok().map(|m| m.len());
                bar.finish_with_message(match (info.size, output_size) {
                    (Some(before), Some(after)) if before > 0 => {
                        format!("done ({} -> {})", format_size(before), format_size(after))
                    }
                    _ => "done".to_string(),
                });
                return JobSummary {
                    file_name,
                    status: JobStatus::Completed,
                    message: None,
                    input_size: info.size,
                    output_size,
                };
            }
            JobEvent::Failed { message } => {
                // The supervisor reports a killed run as an ordinary
                // failure; the cancelled set is what relabels it.
                if cancelled.lock().unwrap().contains(&id) {
                    bar.abandon_with_message("cancelled");
                    return JobSummary {
                        file_name,
                        status: JobStatus::Cancelled,
                        message: None,
                        input_size: info.size,
                        output_size: None,
                    };
                }
                bar.abandon_with_message("failed");
                return JobSummary {
                    file_name,
                    status: JobStatus::Failed,
                    message: Some(message),
                    input_size: info.size,
                    output_size: None,
                };
            }
        }
    }

    // Channel closed without a terminal event; surface it rather than let
    // the job vanish from the summary.
    bar.abandon_with_message("lost");
    JobSummary {
        file_name,
        status: JobStatus::Failed,
        message: Some("event stream ended unexpectedly".to_string()),
        input_size: info.size,
        output_size: None,
    }
}

fn print_summary(summaries: &[JobSummary]) {
    println!();
    for summary in summaries {
        match summary.status {
            JobStatus::Completed => {
                let saved = match (summary.input_size, summary.output_size) {
                    (Some(before), Some(after)) if before > 0 => {
                        let percent = 100.0 - (after as f64 / before as f64) * 100.0;
                        format!(", {percent:.0}% saved")
                    }
                    _ => String::new(),
                };
                println!("  {}: done{saved}", summary.file_name);
            }
            JobStatus::Cancelled => println!("  {}: cancelled", summary.file_name),
            JobStatus::Failed => {
                let reason = summary
                    .message
                    .as_deref()
                    .and_then(|m| m.lines().next())
                    .unwrap_or("unknown error");
                println!("  {}: failed ({reason})", summary.file_name);
            }
            JobStatus::Queued | JobStatus::Running => {}
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
    Ok(())
}

/// `<dir>/<stem>-compressed<ext>`; inputs without an extension get `.mp4`.
fn output_path_for(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".mp4".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}-compressed{ext}"))
}

fn format_eta(eta: Duration) -> String {
    let secs = (eta.as_millis() + 500) / 1000;
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
