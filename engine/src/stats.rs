//! Run statistics.
//!
//! `StatsAggregator` is created once per run and handed to every stage by
//! reference. Workers update it concurrently; the final `RunStats` snapshot
//! is read once the executor has drained.

use crate::model::{CopyOutcome, CopyStatus, SkipReason, VerificationResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared by every stage of one run.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    copied: AtomicU64,
    skipped_unchanged: AtomicU64,
    skipped_too_large: AtomicU64,
    skipped_too_long: AtomicU64,
    failed: AtomicU64,
    verified_ok: AtomicU64,
    verified_fail: AtomicU64,
    soft_errors: AtomicU64,
    bytes_copied: AtomicU64,

    /// Outcomes with status Copied, kept for verification sampling
    copied_outcomes: Mutex<Vec<CopyOutcome>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub copied: u64,
    /// Sum of every skip reason
    pub skipped: u64,
    pub failed: u64,
    pub verified_ok: u64,
    pub verified_fail: u64,
    pub skipped_unchanged: u64,
    pub skipped_too_large: u64,
    pub skipped_too_long: u64,
    /// Entries that could not be read while scanning
    pub soft_errors: u64,
    pub bytes_copied: u64,
}

impl RunStats {
    /// Files that reached a final state (copied, skipped or failed)
    pub fn processed(&self) -> u64 {
        self.copied + self.skipped + self.failed
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one file.
    pub fn record(&self, outcome: &CopyOutcome) {
        match outcome.status {
            CopyStatus::Copied => {
                self.copied.fetch_add(1, Ordering::Relaxed);
                self.bytes_copied
                    .fetch_add(outcome.bytes_copied, Ordering::Relaxed);
                if let Ok(mut copied) = self.copied_outcomes.lock() {
                    copied.push(outcome.clone());
                }
            }
            CopyStatus::Skipped => {
                self.record_skip(outcome.skip_reason.unwrap_or(SkipReason::Unchanged));
            }
            CopyStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a file dropped before it reached the copier.
    pub fn record_skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::Unchanged => &self.skipped_unchanged,
            SkipReason::TooLarge => &self.skipped_too_large,
            SkipReason::PathTooLong => &self.skipped_too_long,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_errors(&self, count: u64) {
        self.soft_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_verification(&self, result: &VerificationResult) {
        if result.matched {
            self.verified_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.verified_fail.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Outcomes of every file copied so far.
    pub fn copied_outcomes(&self) -> Vec<CopyOutcome> {
        self.copied_outcomes
            .lock()
            .map(|copied| copied.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RunStats {
        let skipped_unchanged = self.skipped_unchanged.load(Ordering::Relaxed);
        let skipped_too_large = self.skipped_too_large.load(Ordering::Relaxed);
        let skipped_too_long = self.skipped_too_long.load(Ordering::Relaxed);
        RunStats {
            copied: self.copied.load(Ordering::Relaxed),
            skipped: skipped_unchanged + skipped_too_large + skipped_too_long,
            failed: self.failed.load(Ordering::Relaxed),
            verified_ok: self.verified_ok.load(Ordering::Relaxed),
            verified_fail: self.verified_fail.load(Ordering::Relaxed),
            skipped_unchanged,
            skipped_too_large,
            skipped_too_long,
            soft_errors: self.soft_errors.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter and forget recorded outcomes.
    pub fn reset(&self) {
        for counter in [
            &self.copied,
            &self.skipped_unchanged,
            &self.skipped_too_large,
            &self.skipped_too_long,
            &self.failed,
            &self.verified_ok,
            &self.verified_fail,
            &self.soft_errors,
            &self.bytes_copied,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut copied) = self.copied_outcomes.lock() {
            copied.clear();
        }
    }
}
