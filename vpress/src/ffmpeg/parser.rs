//! Streaming parsers for the transcoder's two progress-reporting formats.
//!
//! The structured channel carries `key=value` lines when machine-parseable
//! progress is requested; the diagnostic channel occasionally carries a
//! free-text `time=HH:MM:SS` marker. Both are best-effort: malformed
//! fragments never produce an error, only silence.

use std::sync::LazyLock;

use regex::Regex;

use super::clock_to_ms;
use crate::progress::ProgressUpdate;

/// Elapsed-time values above this are taken to be microseconds and scaled
/// down; the stream itself carries no unit tag.
const MICROSECOND_THRESHOLD: f64 = 1_000_000.0;

static TIME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d{1,2}):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

/// Line-buffering parser for the structured `key=value` stream.
///
/// Chunks may split lines anywhere; a line is only acted on once its
/// terminator has been seen. All pairs observed in one `push` are merged
/// into a single record.
#[derive(Debug, Default)]
pub struct ProgressParser {
    buf: String,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the stream. Returns a record when the chunk
    /// completed at least one line carrying a recognized field.
    pub fn push(&mut self, chunk: &str) -> Option<ProgressUpdate> {
        self.buf.push_str(chunk);

        let split_at = self.buf.rfind(['\n', '\r'])?;
        let rest = self.buf.split_off(split_at + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        parse_record(complete.split(['\n', '\r']))
    }

    /// Flush an unterminated trailing line as a best-effort final record.
    /// Call once the stream has ended.
    pub fn finish(&mut self) -> Option<ProgressUpdate> {
        if self.buf.is_empty() {
            return None;
        }
        let buf = std::mem::take(&mut self.buf);
        parse_record(buf.split(['\n', '\r']))
    }
}

fn parse_record<'a>(lines: impl Iterator<Item = &'a str>) -> Option<ProgressUpdate> {
    let mut update = ProgressUpdate::default();

    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "out_time_ms" => update.out_time_ms = normalize_out_time(value.trim()),
            "progress" => update.status = Some(value.trim().to_string()),
            _ => {}
        }
    }

    (!update.is_empty()).then_some(update)
}

/// Normalize an elapsed-time field to milliseconds. The transcoder reports
/// it in microseconds or milliseconds depending on version; values beyond
/// the threshold are scaled down. The stream also emits a huge negative
/// value before the first frame, which clamps to zero here.
fn normalize_out_time(value: &str) -> Option<u64> {
    let raw: f64 = value.parse().ok()?;
    if !raw.is_finite() {
        return None;
    }
    let clamped = raw.max(0.0);
    let ms = if clamped > MICROSECOND_THRESHOLD {
        clamped / 1000.0
    } else {
        clamped
    };
    Some(ms.round() as u64)
}

/// Scan one free-text chunk for a `time=HH:MM:SS[.fraction]` marker; on a
/// match, a minimal record carrying only the normalized elapsed time.
pub fn scan_time_marker(chunk: &str) -> Option<ProgressUpdate> {
    let caps = TIME_REGEX.captures(chunk)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(ProgressUpdate {
        out_time_ms: Some(clock_to_ms(hours, minutes, seconds)),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_complete_block() {
        let mut parser = ProgressParser::new();
        let update = parser
            .push("frame=100\nout_time_ms=4500\nprogress=continue\n")
            .expect("record expected");
        assert_eq!(update.out_time_ms, Some(4500));
        assert_eq!(update.status.as_deref(), Some("continue"));
    }

    #[test]
    fn test_push_buffers_partial_lines_across_chunks() {
        let mut parser = ProgressParser::new();
        assert!(parser.push("out_time").is_none());
        assert!(parser.push("_ms=45").is_none());
        let update = parser.push("00\n").expect("record expected");
        assert_eq!(update.out_time_ms, Some(4500));
    }

    #[test]
    fn test_push_holds_back_trailing_fragment() {
        let mut parser = ProgressParser::new();
        let update = parser
            .push("out_time_ms=1000\nprogress=cont")
            .expect("complete line should flush");
        assert_eq!(update.out_time_ms, Some(1000));
        // "progress=cont" is still buffered, not part of the record.
        assert_eq!(update.status, None);

        let update = parser.push("inue\n").expect("record expected");
        assert_eq!(update.status.as_deref(), Some("continue"));
        assert_eq!(update.out_time_ms, None);
    }

    #[test]
    fn test_microsecond_values_scale_down() {
        let mut parser = ProgressParser::new();
        let update = parser.push("out_time_ms=4500000\n").unwrap();
        assert_eq!(update.out_time_ms, Some(4500));
    }

    #[test]
    fn test_millisecond_values_pass_through() {
        let mut parser = ProgressParser::new();
        let update = parser.push("out_time_ms=4500\n").unwrap();
        assert_eq!(update.out_time_ms, Some(4500));
    }

    #[test]
    fn test_negative_out_time_clamps_to_zero() {
        // Seen from real streams before the first frame is written.
        let mut parser = ProgressParser::new();
        let update = parser.push("out_time_ms=-9223372036854775808\n").unwrap();
        assert_eq!(update.out_time_ms, Some(0));
    }

    #[test]
    fn test_unparseable_out_time_is_dropped() {
        let mut parser = ProgressParser::new();
        assert!(parser.push("out_time_ms=N/A\n").is_none());
    }

    #[test]
    fn test_value_keeps_everything_after_first_equals() {
        let mut parser = ProgressParser::new();
        let update = parser.push("progress=a=b\n").unwrap();
        assert_eq!(update.status.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_noise_produces_no_record() {
        let mut parser = ProgressParser::new();
        assert!(parser.push("no separator here\n").is_none());
        assert!(parser.push("\n\n\n").is_none());
        assert!(parser.push("fps=25.0\nbitrate=900k\n").is_none());
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut parser = ProgressParser::new();
        assert!(parser.push("out_time_ms=7000").is_none());
        let update = parser.finish().expect("final flush expected");
        assert_eq!(update.out_time_ms, Some(7000));
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = ProgressParser::new();
        let update = parser.push("out_time_ms=250\r\nprogress=end\r\n").unwrap();
        assert_eq!(update.out_time_ms, Some(250));
        assert_eq!(update.status.as_deref(), Some("end"));
    }

    #[test]
    fn test_scan_time_marker() {
        let chunk = "frame= 120 fps= 30 q=28.0 size=512KiB time=00:00:04.50 bitrate= 931kbits/s";
        let update = scan_time_marker(chunk).expect("marker expected");
        assert_eq!(update.out_time_ms, Some(4500));
        assert_eq!(update.status, None);
    }

    #[test]
    fn test_scan_time_marker_absent() {
        assert!(scan_time_marker("configuration: --enable-gpl").is_none());
    }
}
