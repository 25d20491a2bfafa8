//! Result aggregation
//!
//! Counters are only touched by the harvesting loop, one outcome at a time.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::job::JobOutcome;

/// Final accounting of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub memory_warnings: usize,
    /// Bytes written by successful jobs of this run
    pub produced_bytes: u64,
    pub produced_files: usize,
    pub elapsed_ms: u128,
    /// Wall time divided by successful jobs, if any succeeded
    pub avg_ms_per_success: Option<u128>,
    pub cancelled: bool,
    /// Selected jobs never submitted because the run was interrupted
    pub not_started: usize,
}

impl Summary {
    /// Every job accounted for: succeeded + failed + skipped
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms as u64)
    }
}

/// Accumulates outcomes as they arrive
#[derive(Debug)]
pub struct ResultAggregator {
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    skipped: usize,
    memory_warnings: usize,
    produced_bytes: u64,
    cancelled: bool,
    not_started: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: chrono::Utc::now(),
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            memory_warnings: 0,
            produced_bytes: 0,
            cancelled: false,
            not_started: 0,
        }
    }

    /// Records one outcome. Timeouts count as failures.
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Success { size_bytes, .. } => {
                self.succeeded += 1;
                self.produced_bytes += size_bytes;
            }
            JobOutcome::Skipped(_) => self.skipped += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::TimedOut { .. } => {
                self.failed += 1;
                self.timed_out += 1;
            }
        }
    }

    pub fn record_memory_warning(&mut self) {
        self.memory_warnings += 1;
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn record_not_started(&mut self, count: usize) {
        self.not_started += count;
    }

    /// Outcomes recorded so far
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn summary(&self) -> Summary {
        let elapsed_ms = self.started.elapsed().as_millis();
        Summary {
            started_at: self.started_at,
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            skipped: self.skipped,
            memory_warnings: self.memory_warnings,
            produced_bytes: self.produced_bytes,
            produced_files: self.succeeded,
            elapsed_ms,
            avg_ms_per_success: (self.succeeded > 0).then(|| elapsed_ms / self.succeeded as u128),
            cancelled: self.cancelled,
            not_started: self.not_started,
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
