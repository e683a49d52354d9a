use std::time::{Duration, Instant};

/// Default interval between progress reports.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time view of a file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub done: u64,
    pub total: u64,
    /// Completion in percent (100 for empty files).
    pub percent: f64,
    /// Average speed since the meter started, in bytes per second.
    pub bytes_per_second: f64,
}

/// Elapsed time and volume of a finished (or aborted) transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    /// Average speed in bytes/second. Returns 0.0 for zero elapsed time.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    /// Average speed in KiB/s.
    pub fn kib_per_second(&self) -> f64 {
        self.bytes_per_second() / 1024.0
    }

    /// Elapsed time in milliseconds with sub-millisecond precision.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Tracks bytes moved for one file and throttles progress reports.
pub struct ProgressMeter {
    total: u64,
    done: u64,
    started: Instant,
    last_report: Option<Instant>,
    interval: Duration,
}

impl ProgressMeter {
    /// Creates a meter for a file of `total` bytes.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(total: u64, interval: Option<Duration>) -> Self {
        Self {
            total,
            done: 0,
            started: Instant::now(),
            last_report: None,
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
        }
    }

    /// Records `bytes` more transferred.
    ///
    /// Returns a snapshot when a report is due: the first call, whenever the
    /// interval has elapsed since the last report, and when `total` is reached.
    pub fn advance(&mut self, bytes: u64) -> Option<ProgressSnapshot> {
        self.done += bytes;
        let now = Instant::now();
        let due = match self.last_report {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due || self.done >= self.total {
            self.last_report = Some(now);
            return Some(self.snapshot());
        }
        None
    }

    /// Current progress regardless of throttling.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent = if self.total == 0 {
            100.0
        } else {
            100.0 * self.done as f64 / self.total as f64
        };
        ProgressSnapshot {
            done: self.done,
            total: self.total,
            percent,
            bytes_per_second: self.stats().bytes_per_second(),
        }
    }

    /// Bytes recorded so far.
    pub fn done(&self) -> u64 {
        self.done
    }

    /// Bytes and elapsed time since the meter was created.
    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes: self.done,
            elapsed: self.started.elapsed(),
        }
    }
}
