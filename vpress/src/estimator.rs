//! Percentage and smoothed time-remaining estimation from progress samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Minimum wall-clock gap between adopted updates per job. Events arriving
/// faster are dropped, not queued.
pub const ADOPTION_THROTTLE: Duration = Duration::from_millis(100);

/// Sliding-window length for the speed moving average.
const SPEED_SAMPLES: usize = 5;

/// Percentage of the input processed so far:
/// `round(100 * clamp(elapsed, 0, duration) / duration)`. Undefined without
/// a positive duration or an elapsed sample.
pub fn compute_percent(duration_ms: Option<u64>, out_time_ms: Option<u64>) -> Option<u8> {
    let duration = duration_ms.filter(|&d| d > 0)?;
    let elapsed = out_time_ms?;
    let clamped = elapsed.min(duration);
    Some(((clamped as f64 / duration as f64) * 100.0).round() as u8)
}

/// Smoothed ETA for one job, fed from its progress event stream.
///
/// Instantaneous speed (output time per wall-clock time) between
/// consecutive adopted samples is averaged over a short window; before two
/// samples exist, a coarser estimate extrapolates from total wall time and
/// the current percentage.
#[derive(Debug)]
pub struct EtaTracker {
    duration_ms: Option<u64>,
    started_at: Instant,
    last_out_ms: Option<u64>,
    last_adopted_at: Option<Instant>,
    speed_samples: VecDeque<f64>,
    percent: Option<u8>,
    eta_ms: Option<u64>,
}

impl EtaTracker {
    pub fn new(duration_ms: Option<u64>) -> Self {
        Self::new_at(duration_ms, Instant::now())
    }

    /// Start the tracker at an explicit instant (injectable for tests).
    pub fn new_at(duration_ms: Option<u64>, started_at: Instant) -> Self {
        Self {
            duration_ms,
            started_at,
            last_out_ms: None,
            last_adopted_at: None,
            speed_samples: VecDeque::with_capacity(SPEED_SAMPLES),
            percent: None,
            eta_ms: None,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    /// Smoothed estimate of wall-clock time remaining.
    pub fn eta(&self) -> Option<Duration> {
        self.eta_ms.map(Duration::from_millis)
    }

    /// Feed one progress sample. Returns `false` when the sample was
    /// dropped by the adoption throttle (state unchanged).
    pub fn update(&mut self, out_time_ms: Option<u64>) -> bool {
        self.update_at(out_time_ms, Instant::now())
    }

    /// Feed one progress sample observed at `now`.
    pub fn update_at(&mut self, out_time_ms: Option<u64>, now: Instant) -> bool {
        // The throttle window runs from the last *adopted* event, so a burst
        // of fast events cannot starve updates forever.
        if let Some(last) = self.last_adopted_at
            && now.duration_since(last) < ADOPTION_THROTTLE
        {
            return false;
        }

        let percent = compute_percent(self.duration_ms, out_time_ms);

        if let (Some(out_ms), Some(last_out), Some(last_at)) =
            (out_time_ms, self.last_out_ms, self.last_adopted_at)
        {
            let delta_out = out_ms as f64 - last_out as f64;
            let delta_wall = now.duration_since(last_at).as_millis() as f64;
            if delta_out > 0.0 && delta_wall > 0.0 {
                self.speed_samples.push_back(delta_out / delta_wall);
                while self.speed_samples.len() > SPEED_SAMPLES {
                    self.speed_samples.pop_front();
                }
                let avg_speed =
                    self.speed_samples.iter().sum::<f64>() / self.speed_samples.len() as f64;
                let remaining = self.duration_ms.unwrap_or(0).saturating_sub(out_ms) as f64;
                self.eta_ms = Some((remaining / avg_speed).max(0.0).round() as u64);
            }
        } else if let (Some(out_ms), Some(pct)) = (out_time_ms, percent)
            && out_ms > 0
            && pct > 0
        {
            // Coarse fallback until two samples exist: total time scales
            // linearly with percentage.
            let elapsed = now.duration_since(self.started_at).as_millis() as f64;
            let total_estimate = elapsed * 100.0 / pct as f64;
            self.eta_ms = Some((total_estimate - elapsed).max(0.0).round() as u64);
        }

        if percent.is_some() {
            self.percent = percent;
        }
        self.last_out_ms = out_time_ms;
        self.last_adopted_at = Some(now);
        true
    }

    /// Snap to terminal values once the job completes.
    pub fn complete(&mut self) {
        self.percent = Some(100);
        self.eta_ms = Some(0);
    }
}
