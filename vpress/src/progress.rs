//! Progress snapshots and non-blocking delivery to a job's consumer.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::job::JobEvent;

/// A point-in-time progress snapshot for one running job.
///
/// `out_time_ms` is monotonically non-decreasing in practice but not
/// enforced; consumers should treat regressions as noise. Snapshots from the
/// structured channel and the free-text fallback channel may interleave in
/// any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Elapsed output time, normalized to milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_time_ms: Option<u64>,
    /// Raw phase string from the transcoder ("continue", "end").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        self.out_time_ms.is_none() && self.status.is_none()
    }
}

/// Sends progress snapshots into a job's event channel without ever blocking
/// the stream-reading path; when the consumer lags, snapshots are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<JobEvent>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx }
    }

    /// A reporter whose events go nowhere, for callers that don't care.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Best-effort delivery of one snapshot.
    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.try_send(JobEvent::Progress(update));
    }
}
