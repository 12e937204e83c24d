//! Encoder configuration.

/// Configuration shared by the probe, supervisor and queue.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Maximum number of simultaneously running compressions.
    pub concurrency: usize,
}

impl EncoderConfig {
    /// Create a configuration with defaults: the `FFMPEG_PATH` environment
    /// variable (falling back to `ffmpeg` on the search path) and a
    /// concurrency of half the logical processors.
    pub fn new() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            concurrency: default_concurrency(),
        }
    }

    /// Use a specific ffmpeg binary.
    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Set the concurrency limit (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Half of the detected logical processors, minimum 1. Re-encoding is heavy
/// per process, so running one job per core oversubscribes the machine.
pub fn default_concurrency() -> usize {
    (num_cpus::get() / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_at_least_one() {
        assert!(default_concurrency() >= 1);
    }

    #[test]
    fn test_with_concurrency_clamps_to_one() {
        let config = EncoderConfig::new().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_with_ffmpeg_path() {
        let config = EncoderConfig::new().with_ffmpeg_path("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
    }
}
