//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which keeps the engine
//! independent of how progress is shown. The CLI implements it for terminal
//! output; tests implement it to observe or steer a run.

use crate::model::CopyOutcome;
use crate::stats::RunStats;
use uuid::Uuid;

/// Trait for receiving progress updates from a backup run.
///
/// Methods are called from worker threads, possibly concurrently, so
/// implementations must be `Send + Sync`. Calls for different units may
/// interleave; calls for the files of one unit arrive in order.
pub trait ProgressCallback: Send + Sync {
    /// Called once the work has been partitioned, before any copy starts.
    fn on_run_started(&self, run_id: Uuid, total_units: usize, total_files: usize);

    /// Called when a file is done (copied, skipped, or failed).
    fn on_file_completed(&self, outcome: &CopyOutcome);

    /// Called after every file of a unit has been recorded.
    ///
    /// `completed` counts units finished so far, including this one.
    fn on_unit_completed(&self, completed: usize, total: usize);

    /// Called when the executor has drained, with the copy counters.
    fn on_run_completed(&self, stats: &RunStats);
}

/// Callback that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_started(&self, _run_id: Uuid, _total_units: usize, _total_files: usize) {}
    fn on_file_completed(&self, _outcome: &CopyOutcome) {}
    fn on_unit_completed(&self, _completed: usize, _total: usize) {}
    fn on_run_completed(&self, _stats: &RunStats) {}
}
