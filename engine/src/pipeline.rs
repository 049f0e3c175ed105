//! Run orchestration.
//!
//! `BackupRun` drives one pass of scan → filter → partition → copy → verify
//! over every configured mapping and returns a `RunReport`.

use crate::availability::{FsAvailability, RootAvailability};
use crate::config::BackupConfig;
use crate::error::EngineError;
use crate::executor::{AbortSignal, BackupExecutor};
use crate::filter::{Cutoff, IncrementalFilter};
use crate::ignore::IgnoreRules;
use crate::model::{BackupMapping, CopyOutcome, CopyUnit, FileRecord, VerificationResult};
use crate::partition::partition;
use crate::progress::{NoProgress, ProgressCallback};
use crate::source::{FileIndex, IndexedProvider, ScanErrors, SourceProvider, WalkProvider};
use crate::stats::{RunStats, StatsAggregator};
use crate::verify::VerificationSampler;
use crate::RUN_TARGET;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub stats: RunStats,
    pub verification: Vec<VerificationResult>,
    /// Source or destination roots whose mapping was skipped
    pub unavailable_roots: Vec<PathBuf>,
    /// Destination roots that disappeared during the copy phase
    pub lost_destinations: Vec<PathBuf>,
    /// True when the abort signal stopped the copy early
    pub aborted: bool,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Sampled files whose copy did not match the source
    pub fn verification_failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.verification.iter().filter(|r| !r.matched)
    }
}

/// One configured backup pass.
pub struct BackupRun {
    config: BackupConfig,
    walker: WalkProvider,
    indexed: Option<IndexedProvider<Box<dyn FileIndex>>>,
    rules: Arc<IgnoreRules>,
    scan_errors: ScanErrors,
    availability: Arc<dyn RootAvailability>,
    progress: Arc<dyn ProgressCallback>,
    abort: AbortSignal,
    reference_time: Option<SystemTime>,
}

impl BackupRun {
    pub fn new(config: BackupConfig, rules: IgnoreRules) -> Self {
        let rules = Arc::new(rules);
        let scan_errors = ScanErrors::new();
        BackupRun {
            config,
            walker: WalkProvider::new(Arc::clone(&rules), scan_errors.clone()),
            indexed: None,
            rules,
            scan_errors,
            availability: Arc::new(FsAvailability),
            progress: Arc::new(NoProgress),
            abort: AbortSignal::new(),
            reference_time: None,
        }
    }

    /// Try `index` before walking each source root.
    pub fn with_index<I: FileIndex + 'static>(mut self, index: I) -> Self {
        self.indexed = Some(IndexedProvider::new(
            Box::new(index) as Box<dyn FileIndex>,
            Arc::clone(&self.rules),
            self.scan_errors.clone(),
        ));
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_availability(mut self, availability: Arc<dyn RootAvailability>) -> Self {
        self.availability = availability;
        self
    }

    /// Evaluate the incremental cutoff against `now` instead of the clock.
    pub fn with_reference_time(mut self, now: SystemTime) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Signal that stops this run's copy phase when raised.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Run the whole pipeline once.
    ///
    /// The abort signal is cleared when the run starts, so a `BackupRun` can
    /// be executed again after an aborted run. Only configuration problems are returned as errors; per-file failures
    /// and unavailable roots are reported in the `RunReport`.
    pub fn execute(&self) -> Result<RunReport, EngineError> {
        self.config.validate()?;
        self.abort.reset();

        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        info!(
            target: RUN_TARGET,
            %run_id,
            mappings = self.config.sources.len(),
            incremental_days = self.config.incremental_days,
            "Backup run started"
        );
        for (a, b) in self.config.overlapping_sources() {
            warn!(
                target: RUN_TARGET,
                first = %a.display(),
                second = %b.display(),
                "Overlapping source roots; files may be copied twice"
            );
        }

        let now = self.reference_time.unwrap_or_else(SystemTime::now);
        let filter = IncrementalFilter::new(
            Cutoff::from_days(self.config.incremental_days, now),
            self.config.file_size_limit_bytes(),
        );
        let stats = StatsAggregator::new();
        self.scan_errors.take();

        let parallel = &self.config.parallel;
        let mut units = Vec::new();
        let mut unavailable_roots = Vec::new();
        for mapping in self.config.mappings() {
            let mapping = Arc::new(mapping);
            if let Some(root) = self.unavailable_root(&mapping) {
                unavailable_roots.push(root);
                continue;
            }
            let accepted = filter.filter(self.scan_root(&mapping.source_root), &mapping, &stats);
            debug!(
                root = %mapping.source_root.display(),
                accepted = accepted.len(),
                "Scanned source root"
            );
            // a unit never spans two mappings
            units.extend(partition(
                accepted,
                parallel.small_file_threshold_bytes(),
                parallel.batch_size,
            ));
        }
        stats.record_soft_errors(self.scan_errors.take());

        let total_files = units.iter().map(CopyUnit::len).sum();
        self.progress.on_run_started(run_id, units.len(), total_files);

        let executor = BackupExecutor::new(
            parallel.resolve_workers(),
            &stats,
            self.progress.as_ref(),
            self.availability.as_ref(),
            self.abort.clone(),
        );
        executor.run(units);
        let aborted = self.abort.is_triggered();
        let lost_destinations = executor.lost_destinations();

        let verification = if aborted {
            Vec::new()
        } else {
            // copies under a lost destination cannot be read back
            let outcomes: Vec<CopyOutcome> = stats
                .copied_outcomes()
                .into_iter()
                .filter(|o| {
                    !lost_destinations
                        .iter()
                        .any(|root| *root == o.item.mapping.destination_root)
                })
                .collect();
            VerificationSampler::new(
                self.config.verification_sample_size,
                self.config.verify_checksum,
            )
            .verify(&outcomes)
        };
        for result in &verification {
            stats.record_verification(result);
        }

        let stats = stats.snapshot();
        info!(
            target: RUN_TARGET,
            %run_id,
            copied = stats.copied,
            skipped = stats.skipped,
            failed = stats.failed,
            verified_ok = stats.verified_ok,
            verified_fail = stats.verified_fail,
            soft_errors = stats.soft_errors,
            lost_destinations = lost_destinations.len(),
            aborted,
            "Backup run finished"
        );

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Local::now(),
            stats,
            verification,
            unavailable_roots,
            lost_destinations,
            aborted,
        })
    }

    /// The root that keeps `mapping` from running, if any.
    ///
    /// A missing destination root is created first.
    fn unavailable_root(&self, mapping: &BackupMapping) -> Option<PathBuf> {
        if !self.availability.is_available(&mapping.source_root) {
            warn!(
                target: RUN_TARGET,
                root = %mapping.source_root.display(),
                "Source root unavailable, mapping skipped"
            );
            return Some(mapping.source_root.clone());
        }
        if let Err(e) = fs::create_dir_all(&mapping.destination_root) {
            debug!(
                root = %mapping.destination_root.display(),
                error = %e,
                "Could not create destination root"
            );
        }
        if !self.availability.is_available(&mapping.destination_root) {
            warn!(
                target: RUN_TARGET,
                root = %mapping.destination_root.display(),
                "Destination root unavailable, mapping skipped"
            );
            return Some(mapping.destination_root.clone());
        }
        None
    }

    /// Candidates under `root`: indexed when possible, walked otherwise.
    fn scan_root(&self, root: &Path) -> Box<dyn Iterator<Item = FileRecord> + '_> {
        if let Some(indexed) = &self.indexed {
            match indexed.list_candidates(root) {
                Ok(records) => {
                    debug!(root = %root.display(), provider = indexed.name(), "Using provider");
                    return records;
                }
                Err(e) => debug!(error = %e, "Falling back to directory walk"),
            }
        }
        match self.walker.list_candidates(root) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "No provider could list root");
                Box::new(std::iter::empty())
            }
        }
    }
}
