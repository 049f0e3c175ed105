//! Parallel copy executor.
//!
//! A fixed pool of scoped worker threads pulls `CopyUnit`s from a bounded
//! queue fed by the calling thread:
//! - a batch is copied sequentially inside one worker
//! - every outcome is recorded in the run's `StatsAggregator`
//! - a unit in which every file failed triggers a check of its destination
//!   root; files for a lost destination are dropped from then on while other
//!   destinations keep being served
//!
//! Once the `AbortSignal` is raised, no further units are submitted and queued
//! units are dropped unprocessed. Units already being copied finish. `run`
//! always joins the pool and returns whatever was recorded.

use crate::availability::RootAvailability;
use crate::fs_ops;
use crate::model::{BackupMapping, CopyOutcome, CopyStatus, CopyUnit, SkipReason};
use crate::progress::ProgressCallback;
use crate::stats::{RunStats, StatsAggregator};
use crate::{LOST_TARGET, RUN_TARGET};
use crossbeam_channel::{bounded, Receiver};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

/// Run-wide cancellation flag shared by the feeder and every worker.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lower the flag so the signal can serve another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Copies units of work on a pool of worker threads.
pub struct BackupExecutor<'a> {
    workers: usize,
    stats: &'a StatsAggregator,
    progress: &'a dyn ProgressCallback,
    availability: &'a dyn RootAvailability,
    abort: AbortSignal,
    /// Destination roots found unavailable during this run
    lost: Mutex<HashSet<PathBuf>>,
}

impl<'a> BackupExecutor<'a> {
    pub fn new(
        workers: usize,
        stats: &'a StatsAggregator,
        progress: &'a dyn ProgressCallback,
        availability: &'a dyn RootAvailability,
        abort: AbortSignal,
    ) -> Self {
        BackupExecutor {
            workers: workers.max(1),
            stats,
            progress,
            availability,
            abort,
            lost: Mutex::new(HashSet::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Destination roots that were lost while copying, sorted.
    pub fn lost_destinations(&self) -> Vec<PathBuf> {
        let mut lost: Vec<PathBuf> = self
            .lost
            .lock()
            .map(|lost| lost.iter().cloned().collect())
            .unwrap_or_default();
        lost.sort();
        lost
    }

    fn is_lost(&self, root: &Path) -> bool {
        self.lost
            .lock()
            .map(|lost| lost.contains(root))
            .unwrap_or(false)
    }

    fn mark_lost(&self, root: &Path) {
        if let Ok(mut lost) = self.lost.lock() {
            lost.insert(root.to_path_buf());
        }
    }

    /// True when the unit's first item targets a lost destination.
    fn targets_lost_destination(&self, unit: &CopyUnit) -> bool {
        unit.first()
            .is_some_and(|item| self.is_lost(&item.mapping.destination_root))
    }

    /// Copy every unit and return the counters once the pool has drained.
    pub fn run(&self, units: Vec<CopyUnit>) -> RunStats {
        let total = units.len();
        let completed = AtomicUsize::new(0);
        let (tx, rx) = bounded::<CopyUnit>(self.workers);
        debug!(workers = self.workers, units = total, "Starting executor");

        thread::scope(|s| {
            let mut spawned = 0;
            for id in 0..self.workers {
                let rx = rx.clone();
                let completed = &completed;
                let builder = thread::Builder::new().name(format!("mirror-{}", id));
                match builder.spawn_scoped(s, move || self.worker_loop(rx, completed, total)) {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!(worker = id, error = %e, "Failed to spawn worker"),
                }
            }
            drop(rx);

            if spawned == 0 {
                // no pool: copy on the calling thread
                drop(tx);
                for unit in units {
                    if self.abort.is_triggered() {
                        break;
                    }
                    self.process_unit(unit, &completed, total);
                }
                return;
            }

            for unit in units {
                if self.abort.is_triggered() {
                    debug!("Abort raised, no further units submitted");
                    break;
                }
                if self.targets_lost_destination(&unit) {
                    continue;
                }
                if tx.send(unit).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        let stats = self.stats.snapshot();
        self.progress.on_run_completed(&stats);
        stats
    }

    fn worker_loop(&self, rx: Receiver<CopyUnit>, completed: &AtomicUsize, total: usize) {
        for unit in rx.iter() {
            if self.abort.is_triggered() {
                debug!(files = unit.len(), "Dropping queued unit after abort");
                continue;
            }
            self.process_unit(unit, completed, total);
        }
    }

    fn process_unit(&self, unit: CopyUnit, completed: &AtomicUsize, total: usize) {
        // destination root -> whether every file copied there failed
        let mut roots: Vec<(Arc<BackupMapping>, bool)> = Vec::new();

        for item in unit.into_items() {
            if self.is_lost(&item.mapping.destination_root) {
                debug!(
                    path = %item.record.absolute_path.display(),
                    "Dropping file for lost destination"
                );
                continue;
            }
            let mapping = Arc::clone(&item.mapping);
            let outcome = fs_ops::copy_file(item);
            log_outcome(&outcome);
            self.stats.record(&outcome);
            self.progress.on_file_completed(&outcome);

            let failed = outcome.status == CopyStatus::Failed;
            match roots
                .iter_mut()
                .find(|(m, _)| m.destination_root == mapping.destination_root)
            {
                Some((_, all_failed)) => *all_failed &= failed,
                None => roots.push((mapping, failed)),
            }
        }

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.on_unit_completed(done, total);

        for (mapping, all_failed) in roots {
            if all_failed && !self.availability.is_available(&mapping.destination_root) {
                warn!(
                    target: RUN_TARGET,
                    root = %mapping.destination_root.display(),
                    "Destination became unavailable, remaining files for it are dropped"
                );
                self.mark_lost(&mapping.destination_root);
            }
        }
    }
}

fn log_outcome(outcome: &CopyOutcome) {
    let path = outcome.source_path().display();
    match outcome.status {
        CopyStatus::Copied => info!(
            target: RUN_TARGET,
            path = %path,
            bytes = outcome.bytes_copied,
            "Copied"
        ),
        CopyStatus::Skipped => debug!(
            target: RUN_TARGET,
            path = %path,
            "Skipped: {}",
            outcome.skip_reason.unwrap_or(SkipReason::Unchanged)
        ),
        CopyStatus::Failed => {
            let detail = outcome.error_detail.as_deref().unwrap_or("unknown error");
            warn!(target: RUN_TARGET, path = %path, code = ?outcome.error_code, "Failed: {}", detail);
            warn!(target: LOST_TARGET, path = %path, "{}", detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::FsAvailability;
    use crate::model::{CopyItem, FileRecord};
    use crate::partition::partition;
    use crate::progress::NoProgress;
    use std::fs;

    fn make_items(src: &Path, dst: &Path, count: usize) -> Vec<CopyItem> {
        fs::create_dir_all(src).expect("Failed to create src dir");
        let mapping = Arc::new(BackupMapping::new(src, dst));
        (0..count)
            .map(|i| {
                let path = src.join(format!("file{i}.txt"));
                fs::write(&path, format!("content {i}")).expect("Failed to write source");
                let metadata = fs::metadata(&path).expect("Failed to stat source");
                CopyItem {
                    record: FileRecord {
                        absolute_path: path.clone(),
                        size_bytes: metadata.len(),
                        modified: metadata.modified().expect("mtime"),
                        source_root: src.to_path_buf(),
                    },
                    destination: dst.join(format!("file{i}.txt")),
                    mapping: Arc::clone(&mapping),
                }
            })
            .collect()
    }

    fn run_with(workers: usize, units: Vec<CopyUnit>, progress: &dyn ProgressCallback) -> RunStats {
        let stats = StatsAggregator::new();
        let executor = BackupExecutor::new(
            workers,
            &stats,
            progress,
            &FsAvailability,
            AbortSignal::new(),
        );
        executor.run(units)
    }

    #[test]
    fn test_copies_every_unit() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let items = make_items(&temp_dir.path().join("src"), &temp_dir.path().join("dst"), 20);
        let stats = run_with(4, partition(items, 1024, 3), &NoProgress);
        assert_eq!(stats.copied, 20);
        assert_eq!(stats.failed, 0);
        assert!(temp_dir.path().join("dst").join("file19.txt").exists());
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let one = run_with(
            1,
            partition(
                make_items(&temp_dir.path().join("src"), &temp_dir.path().join("d1"), 12),
                1024,
                5,
            ),
            &NoProgress,
        );
        let many = run_with(
            8,
            partition(
                make_items(&temp_dir.path().join("src"), &temp_dir.path().join("d8"), 12),
                1024,
                5,
            ),
            &NoProgress,
        );
        assert_eq!(one, many);
    }

    #[derive(Default)]
    struct Recorder {
        units: Mutex<Vec<(usize, usize)>>,
        files: AtomicUsize,
    }

    impl ProgressCallback for Recorder {
        fn on_run_started(&self, _run_id: uuid::Uuid, _total_units: usize, _total_files: usize) {}
        fn on_file_completed(&self, _outcome: &CopyOutcome) {
            self.files.fetch_add(1, Ordering::SeqCst);
        }
        fn on_unit_completed(&self, completed: usize, total: usize) {
            self.units
                .lock()
                .expect("recorder lock")
                .push((completed, total));
        }
        fn on_run_completed(&self, _stats: &RunStats) {}
    }

    #[test]
    fn test_progress_reports_each_unit_once() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let items = make_items(&temp_dir.path().join("src"), &temp_dir.path().join("dst"), 7);
        let recorder = Recorder::default();
        run_with(3, partition(items, 1024, 2), &recorder);

        let mut units = recorder.units.lock().expect("recorder lock").clone();
        units.sort();
        assert_eq!(units, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
        assert_eq!(recorder.files.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_lost_destination_drops_its_remaining_units() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dst");
        let items = make_items(&temp_dir.path().join("src"), &dst, 5);
        // the destination root is a file, so every copy fails
        fs::write(&dst, b"not a directory").expect("Failed to write blocker");

        let stats = StatsAggregator::new();
        let abort = AbortSignal::new();
        let executor = BackupExecutor::new(1, &stats, &NoProgress, &FsAvailability, abort.clone());
        let result = executor.run(partition(items, 0, 1));

        assert!(!abort.is_triggered());
        assert_eq!(executor.lost_destinations(), vec![dst]);
        assert_eq!(result.copied, 0);
        assert!(result.failed >= 1 && result.failed < 5);
    }

    #[test]
    fn test_lost_destination_does_not_stop_other_destinations() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let lost_dst = temp_dir.path().join("lost");
        let good_dst = temp_dir.path().join("good");
        let mut items = make_items(&temp_dir.path().join("a"), &lost_dst, 3);
        items.extend(make_items(&temp_dir.path().join("b"), &good_dst, 3));
        fs::write(&lost_dst, b"not a directory").expect("Failed to write blocker");

        let stats = StatsAggregator::new();
        let executor =
            BackupExecutor::new(1, &stats, &NoProgress, &FsAvailability, AbortSignal::new());
        let result = executor.run(partition(items, 0, 1));

        assert_eq!(result.copied, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(executor.lost_destinations(), vec![lost_dst]);
        assert!(good_dst.join("file2.txt").exists());
    }

    #[test]
    fn test_pre_raised_abort_copies_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let items = make_items(&temp_dir.path().join("src"), &temp_dir.path().join("dst"), 4);
        let stats = StatsAggregator::new();
        let abort = AbortSignal::new();
        abort.trigger();
        let executor = BackupExecutor::new(2, &stats, &NoProgress, &FsAvailability, abort);
        let result = executor.run(partition(items, 0, 1));
        assert_eq!(result.processed(), 0);
    }
}
