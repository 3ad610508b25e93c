use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::state::{PageRecord, PageStatus, StatusCounts};

/// Fixed-bucket latency histogram, in milliseconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(u64, u64)>,
    sum_ms: u64,
    count: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: [50, 100, 250, 500, 1000, 2500, 5000, 10_000, u64::MAX]
                .into_iter()
                .map(|threshold| (threshold, 0))
                .collect(),
            sum_ms: 0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value_ms: u64) {
        self.sum_ms = self.sum_ms.saturating_add(value_ms);
        self.count += 1;

        for (threshold, count) in &mut self.buckets {
            if value_ms <= *threshold {
                *count += 1;
                break;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_ms as f64 / self.count as f64)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for the current session. Store-wide totals live in [`StatusCounts`].
#[derive(Debug, Default)]
pub struct CrawlMetrics {
    pub dispatched: Counter,
    pub succeeded: Counter,
    pub failed: Counter,
    pub skipped_duplicate: Counter,
    pub skipped_canonical: Counter,
    pub skipped_depth: Counter,
    pub skipped_domain: Counter,
    pub robots_blocked: Counter,
    pub retries: Counter,
    pub released: Counter,
    pub fetch_latency: Mutex<Histogram>,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one terminal record written this session.
    pub fn record(&self, status: PageStatus) {
        match status {
            PageStatus::Success => self.succeeded.inc(),
            PageStatus::Error => self.failed.inc(),
            PageStatus::SkippedDuplicate => self.skipped_duplicate.inc(),
            PageStatus::SkippedCanonical => self.skipped_canonical.inc(),
            PageStatus::SkippedDepth => self.skipped_depth.inc(),
            PageStatus::SkippedDomain => self.skipped_domain.inc(),
            PageStatus::Pending => {}
        }
    }

    pub fn observe_fetch(&self, elapsed: Duration) {
        self.fetch_latency.lock().observe(elapsed.as_millis() as u64);
    }

    pub fn processed(&self) -> u64 {
        self.succeeded.get()
            + self.failed.get()
            + self.skipped_duplicate.get()
            + self.skipped_canonical.get()
    }

    pub fn snapshot(&self) -> SessionCounts {
        SessionCounts {
            dispatched: self.dispatched.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            skipped_duplicate: self.skipped_duplicate.get(),
            skipped_canonical: self.skipped_canonical.get(),
            skipped_depth: self.skipped_depth.get(),
            skipped_domain: self.skipped_domain.get(),
            robots_blocked: self.robots_blocked.get(),
            retries: self.retries.get(),
            released: self.released.get(),
            mean_fetch_ms: self.fetch_latency.lock().mean_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionCounts {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped_duplicate: u64,
    pub skipped_canonical: u64,
    pub skipped_depth: u64,
    pub skipped_domain: u64,
    pub robots_blocked: u64,
    pub retries: u64,
    pub released: u64,
    pub mean_fetch_ms: Option<f64>,
}

impl fmt::Display for SessionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} failed, {} duplicate, {} canonical, {} too deep, {} off-site, {} retries",
            self.succeeded,
            self.failed,
            self.skipped_duplicate,
            self.skipped_canonical,
            self.skipped_depth,
            self.skipped_domain,
            self.retries
        )
    }
}

/// What a crawl run hands back to its caller.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub seed_url: String,
    pub session: SessionCounts,
    pub totals: StatusCounts,
    pub interrupted: bool,
    pub max_pages_reached: bool,
    pub frontier_remaining: usize,
    pub duration: Duration,
}

impl CrawlReport {
    pub fn total(&self, status: PageStatus) -> usize {
        self.totals.get(status)
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.interrupted {
            "interrupted"
        } else if self.max_pages_reached {
            "stopped at page limit"
        } else {
            "complete"
        };
        writeln!(
            f,
            "Crawl of {} {} in {:.1}s",
            self.seed_url,
            outcome,
            self.duration.as_secs_f64()
        )?;
        writeln!(f, "  this session: {}", self.session)?;
        writeln!(f, "  store totals: {}", self.totals)?;
        write!(f, "  left in frontier: {}", self.frontier_remaining)
    }
}

/// Render failed records one per line for `--failed` style listings.
pub fn format_failed(records: &[PageRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let code = r
                .http_status_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}\t{}\t{}",
                code,
                r.url,
                r.error_message.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
