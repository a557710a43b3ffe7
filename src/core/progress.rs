//! Progress reporting for the backup pipeline.
//!
//! Every step pushes [`StepProgress`] events into an mpsc channel. Subprocess steps
//! derive their percentages from output lines: [`ProgressLines`] pulls lines out of any
//! async reader and [`PercentTracker`] filters them down to forward progress, so the
//! parsing can be driven by canned output in tests as easily as by a live child process.

use regex::Regex;
use std::io;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::logging::LogThrottle;

/// A progress update from one of the pipeline steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepProgress {
    Mirror {
        bytes_done: u64,
        total_bytes: u64,
        current_file: String,
    },
    Archive {
        percent: u8,
    },
    Verify {
        percent: u8,
    },
    Upload {
        account: String,
        file: String,
        attempt: u32,
    },
}

/// Which subprocess step a percentage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentStep {
    Archive,
    Verify,
}

impl PercentStep {
    pub fn event(self, percent: u8) -> StepProgress {
        match self {
            Self::Archive => StepProgress::Archive { percent },
            Self::Verify => StepProgress::Verify { percent },
        }
    }
}

// Whitespace, a run of digits, then a percent sign: "  42% 17 + data.bin"
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s(\d+)%").expect("percent pattern is valid"));

/// Extracts percentages from output lines and only reports forward progress.
#[derive(Debug, Default)]
pub struct PercentTracker {
    current: u8,
}

impl PercentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new percentage if `line` carries one greater than any seen before.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        let caps = PERCENT_RE.captures(line)?;
        let value: u8 = caps[1].parse().ok()?;

        if value > 100 || value <= self.current {
            return None;
        }

        self.current = value;
        Some(value)
    }

    pub fn current(&self) -> u8 {
        self.current
    }
}

/// Pull-based line producer over a byte stream.
///
/// Lines end at `\n`, `\r` or backspace, since console tools redraw their progress
/// in place instead of printing new lines. Empty lines are skipped.
pub struct ProgressLines<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ProgressLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut byte = [0u8; 1];

        loop {
            let n = self.reader.read(&mut byte).await?;
            if n == 0 {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match byte[0] {
                b'\n' | b'\r' | 0x08 => {
                    if !self.line.is_empty() {
                        return Ok(Some(self.take_line()));
                    }
                }
                b => self.line.push(b),
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }
}

/// Read `reader` to the end, forwarding each step of forward progress into `tx`.
///
/// Returns the last percentage seen.
pub async fn forward_percentages<R: AsyncRead + Unpin>(
    reader: R,
    step: PercentStep,
    tx: &mpsc::Sender<StepProgress>,
) -> io::Result<u8> {
    let mut lines = ProgressLines::new(reader);
    let mut tracker = PercentTracker::new();

    while let Some(line) = lines.next_line().await? {
        trace!(line = %line, "archiver output");
        if let Some(percent) = tracker.observe(&line) {
            let _ = tx.send(step.event(percent)).await;
        }
    }

    Ok(tracker.current())
}

/// Drain progress events into the log until every sender is dropped.
pub fn spawn_progress_logger(mut rx: mpsc::Receiver<StepProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let throttle = LogThrottle::new(Duration::from_secs(2));
        let mut last_step = None;

        while let Some(event) = rx.recv().await {
            let step = std::mem::discriminant(&event);
            if last_step != Some(step) {
                throttle.reset();
                last_step = Some(step);
            }

            match event {
                StepProgress::Mirror {
                    bytes_done,
                    total_bytes,
                    current_file,
                } => {
                    if bytes_done >= total_bytes || throttle.should_log() {
                        let percent = if total_bytes > 0 {
                            (bytes_done as f64 / total_bytes as f64 * 100.0) as u8
                        } else {
                            100
                        };
                        info!(
                            bytes_done,
                            total_bytes,
                            percent,
                            file = %current_file,
                            "Mirroring"
                        );
                    }
                }
                StepProgress::Archive { percent } => {
                    if percent == 100 || throttle.should_log() {
                        info!(percent, "Archiving");
                    }
                }
                StepProgress::Verify { percent } => {
                    if percent == 100 || throttle.should_log() {
                        info!(percent, "Verifying");
                    }
                }
                StepProgress::Upload {
                    account,
                    file,
                    attempt,
                } => {
                    info!(account = %account, file = %file, attempt, "Uploading");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_only_forward_progress() {
        let mut tracker = PercentTracker::new();

        assert_eq!(tracker.observe("  5% 3 + a.bin"), Some(5));
        assert_eq!(tracker.observe("  5% 3 + a.bin"), None);
        assert_eq!(tracker.observe("  3% 2 + a.bin"), None);
        assert_eq!(tracker.observe(" 42%"), Some(42));
        assert_eq!(tracker.current(), 42);
    }

    #[test]
    fn tracker_ignores_lines_without_leading_whitespace_or_percent() {
        let mut tracker = PercentTracker::new();

        assert_eq!(tracker.observe("7-Zip 23.01 (x64)"), None);
        assert_eq!(tracker.observe("50%"), None);
        assert_eq!(tracker.observe("Everything is Ok"), None);
        assert_eq!(tracker.observe(" 0%"), None);
    }

    #[test]
    fn tracker_rejects_values_above_hundred() {
        let mut tracker = PercentTracker::new();

        assert_eq!(tracker.observe(" 250%"), None);
        assert_eq!(tracker.observe(" 101%"), None);
        assert_eq!(tracker.observe(" 100%"), Some(100));
    }

    #[tokio::test]
    async fn lines_split_on_carriage_return_and_backspace() {
        let output: &[u8] = b"Scanning\n  1%\r\x08\x08\x08\x08 12% a\r\n\nEverything is Ok";
        let mut lines = ProgressLines::new(output);

        let mut collected = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            collected.push(line);
        }

        assert_eq!(collected, vec!["Scanning", "  1%", " 12% a", "Everything is Ok"]);
    }

    #[tokio::test]
    async fn forward_percentages_emits_monotonic_events() {
        let output: &[u8] = b"  10%\r  30%\r  20%\r  30%\r 100%\nEverything is Ok\n";
        let (tx, mut rx) = mpsc::channel(16);

        let last = forward_percentages(output, PercentStep::Verify, &tx)
            .await
            .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(last, 100);
        assert_eq!(
            events,
            vec![
                StepProgress::Verify { percent: 10 },
                StepProgress::Verify { percent: 30 },
                StepProgress::Verify { percent: 100 },
            ]
        );
    }
}
