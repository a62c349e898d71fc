//! Run counters, periodic progress lines and stall detection

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progress line every this many processed units
const REPORT_EVERY: u64 = 10;

/// Counters shared by every worker of a run
pub struct Progress {
    units: AtomicU64,
    skipped: AtomicU64,
    records: AtomicU64,
    failures: AtomicU64,
    restarts: AtomicU64,
    stall_streak: AtomicU32,
    budget_at_last_restart: AtomicU64,
    stall_threshold: u32,
    started: Instant,
}

/// Final numbers for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Units processed for the first time
    pub units: u64,
    /// Units skipped because an earlier attempt or run completed them
    pub skipped: u64,
    pub records: u64,
    pub failures: u64,
    pub restarts: u64,
    pub elapsed: Duration,
}

impl Progress {
    /// Creates counters; `stall_threshold` of 0 disables stall warnings
    pub fn new(stall_threshold: u32) -> Self {
        Self {
            units: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            records: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            stall_streak: AtomicU32::new(0),
            budget_at_last_restart: AtomicU64::new(0),
            stall_threshold,
            started: Instant::now(),
        }
    }

    /// Counts a newly processed unit and the records it yielded
    pub fn record_unit(&self, records: usize) {
        self.records.fetch_add(records as u64, Ordering::Relaxed);
        let units = self.units.fetch_add(1, Ordering::Relaxed) + 1;

        if units % REPORT_EVERY == 0 {
            let elapsed = self.started.elapsed();
            let rate = units as f64 / elapsed.as_secs_f64().max(0.001);
            info!(
                "Progress: {} units, {} records, {} skipped, {:.2} units/sec",
                units,
                self.records.load(Ordering::Relaxed),
                self.skipped.load(Ordering::Relaxed),
                rate
            );
        }
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a restart and checks for a stall
    ///
    /// A stall is `stall_threshold` consecutive restarts during which the
    /// budget count did not move. Stalls are only reported, never fatal.
    ///
    /// # Returns
    ///
    /// True if this restart reached the stall threshold
    pub fn record_restart(&self, budget_count: u64) -> bool {
        self.restarts.fetch_add(1, Ordering::Relaxed);

        let previous = self
            .budget_at_last_restart
            .swap(budget_count, Ordering::SeqCst);
        let streak = if budget_count > previous {
            self.stall_streak.store(1, Ordering::SeqCst);
            1
        } else {
            self.stall_streak.fetch_add(1, Ordering::SeqCst) + 1
        };

        if self.stall_threshold > 0 && streak >= self.stall_threshold {
            warn!(
                "Possible stall: {} restarts without budget progress (count stuck at {})",
                streak, budget_count
            );
            return true;
        }
        false
    }

    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            units: self.units.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "Crawl finished: {} units ({} records, {} skipped) in {:?}; {} failures, {} restarts",
            self.units, self.records, self.skipped, self.elapsed, self.failures, self.restarts
        );
    }
}
