//! Bounded-concurrency scheduler for compression jobs.
//!
//! A single control flow (the mutex around [`QueueState`]) owns all queue
//! bookkeeping; the only true parallelism is across the external processes
//! themselves. Jobs start FIFO as slots free up, and a finished job --
//! successful or not -- always re-drives the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::ffmpeg::ProcessSupervisor;
use crate::job::{CompressionJob, JobEvent};
use crate::progress::ProgressReporter;

/// Capacity of each job's event channel. Progress past this is dropped
/// rather than blocking the stream readers; the terminal event always
/// arrives.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct QueuedJob {
    job: CompressionJob,
    events: mpsc::Sender<JobEvent>,
}

struct QueueState {
    pending: VecDeque<QueuedJob>,
    running: usize,
    limit: usize,
}

struct Inner {
    supervisor: Arc<ProcessSupervisor>,
    state: Mutex<QueueState>,
}

/// Accepts job submissions, bounds concurrent external-process execution,
/// and supports removing queued work or cancelling running work.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct CompressionQueue {
    inner: Arc<Inner>,
}

impl CompressionQueue {
    pub fn new(config: EncoderConfig) -> Self {
        let concurrency = config.concurrency;
        Self::with_supervisor(
            Arc::new(ProcessSupervisor::new(config.ffmpeg_path)),
            concurrency,
        )
    }

    /// Build around an existing supervisor instance.
    pub fn with_supervisor(supervisor: Arc<ProcessSupervisor>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    limit: concurrency.max(1),
                }),
            }),
        }
    }

    /// Submit a job. Its events arrive on the returned receiver: any number
    /// of `Progress` snapshots followed by exactly one `Completed` or
    /// `Failed`, after which the channel closes.
    pub fn submit(&self, job: CompressionJob) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        debug!(id = %job.id, input = %job.input_path.display(), "job queued");
        self.inner
            .state
            .lock()
            .pending
            .push_back(QueuedJob { job, events: tx });
        self.try_start_next();
        rx
    }

    /// Change the number of simultaneously running jobs (clamped to at
    /// least 1). Raising the limit starts queued jobs immediately; lowering
    /// it never interrupts jobs already running.
    pub fn set_concurrency(&self, limit: usize) {
        let limit = limit.max(1);
        self.inner.state.lock().limit = limit;
        info!(limit, "concurrency limit changed");
        self.try_start_next();
    }

    pub fn concurrency(&self) -> usize {
        self.inner.state.lock().limit
    }

    /// Jobs waiting for a slot.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Jobs currently holding a slot. Never exceeds [`Self::concurrency`].
    pub fn running_len(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Cancel a job wherever it currently is. A job still pending is
    /// removed without ever spawning a process and its channel receives a
    /// terminal event; a running job is signalled to terminate and fails
    /// asynchronously. Unknown or already-finished ids are a no-op.
    pub fn cancel(&self, id: &str) {
        let removed = {
            let mut state = self.inner.state.lock();
            let idx = state.pending.iter().position(|queued| queued.job.id == id);
            idx.and_then(|idx| state.pending.remove(idx))
        };

        if let Some(queued) = removed {
            info!(id, "job cancelled before start");
            // No process ever existed; drop any speculative staging state.
            self.inner.supervisor.cancel(id);
            let _ = queued.events.try_send(JobEvent::Failed {
                message: "cancelled before start".to_string(),
            });
            return;
        }

        self.inner.supervisor.cancel(id);
    }

    /// Pop and start pending jobs while slots are free. The slot is claimed
    /// under the lock, before the process spawns, so concurrent submissions
    /// can never over-admit.
    fn try_start_next(&self) {
        loop {
            let queued = {
                let mut state = self.inner.state.lock();
                if state.running >= state.limit {
                    return;
                }
                let Some(queued) = state.pending.pop_front() else {
                    return;
                };
                state.running += 1;
                queued
            };
            self.start(queued);
        }
    }

    fn start(&self, queued: QueuedJob) {
        let queue = self.clone();
        let supervisor = Arc::clone(&self.inner.supervisor);
        tokio::spawn(async move {
            let QueuedJob { job, events } = queued;
            info!(id = %job.id, "job started");

            let reporter = ProgressReporter::new(events.clone());
            let result = supervisor.run(&job, &reporter).await;

            let terminal = match result {
                Ok(output_path) => JobEvent::Completed { output_path },
                Err(e) => {
                    warn!(id = %job.id, error = %e, "job failed");
                    JobEvent::Failed {
                        message: e.to_string(),
                    }
                }
            };

            // Release the slot before delivering the terminal event: the
            // queue must keep draining even if this consumer is gone or
            // slow.
            queue.on_job_finished();
            let _ = events.send(terminal).await;
        });
    }

    fn on_job_finished(&self) {
        self.inner.state.lock().running -= 1;
        self.try_start_next();
    }
}
