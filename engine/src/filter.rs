//! Incremental filter.
//!
//! Decides which candidate records are worth handing to the copier and pairs
//! each accepted record with its destination path.

use crate::model::{BackupMapping, CopyItem, FileRecord, SkipReason};
use crate::stats::StatsAggregator;
use crate::RUN_TARGET;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Longest source or destination path, in characters, that is copied.
pub const MAX_PATH_CHARS: usize = 240;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Modification-time cutoff of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Full backup: every record passes the time check
    Disabled,
    /// Only records modified at or after this instant pass
    Since(SystemTime),
}

impl Cutoff {
    /// Cutoff for "modified in the last `days` days"; 0 disables it.
    pub fn from_days(days: u32, now: SystemTime) -> Self {
        if days == 0 {
            return Cutoff::Disabled;
        }
        let window = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
        Cutoff::Since(now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH))
    }

    pub fn admits(&self, modified: SystemTime) -> bool {
        match self {
            Cutoff::Disabled => true,
            Cutoff::Since(since) => modified >= *since,
        }
    }
}

pub(crate) fn path_chars(path: &Path) -> usize {
    path.as_os_str().to_string_lossy().chars().count()
}

/// Size, age and path-length filter.
#[derive(Debug, Clone, Copy)]
pub struct IncrementalFilter {
    cutoff: Cutoff,
    size_limit_bytes: u64,
}

impl IncrementalFilter {
    pub fn new(cutoff: Cutoff, size_limit_bytes: u64) -> Self {
        IncrementalFilter {
            cutoff,
            size_limit_bytes,
        }
    }

    pub fn cutoff(&self) -> Cutoff {
        self.cutoff
    }

    /// Filter the records of one mapping.
    ///
    /// Oversize records and records with an overlong source or destination
    /// path are counted as skipped in `stats`. Records older than the cutoff
    /// are not candidates and are dropped without being counted.
    pub fn filter<I>(
        &self,
        records: I,
        mapping: &Arc<BackupMapping>,
        stats: &StatsAggregator,
    ) -> Vec<CopyItem>
    where
        I: IntoIterator<Item = FileRecord>,
    {
        let mut accepted = Vec::new();
        for record in records {
            if !self.cutoff.admits(record.modified) {
                continue;
            }
            if record.size_bytes > self.size_limit_bytes {
                tracing::info!(
                    target: RUN_TARGET,
                    path = %record.absolute_path.display(),
                    size = record.size_bytes,
                    "Skipped: {}",
                    SkipReason::TooLarge
                );
                stats.record_skip(SkipReason::TooLarge);
                continue;
            }
            let Some(destination) = mapping.destination_for(&record.absolute_path) else {
                tracing::debug!(
                    path = %record.absolute_path.display(),
                    root = %mapping.source_root.display(),
                    "Record is not under its mapping's source root"
                );
                continue;
            };
            if path_chars(&record.absolute_path) > MAX_PATH_CHARS
                || path_chars(&destination) > MAX_PATH_CHARS
            {
                tracing::info!(
                    target: RUN_TARGET,
                    path = %record.absolute_path.display(),
                    "Skipped: {}",
                    SkipReason::PathTooLong
                );
                stats.record_skip(SkipReason::PathTooLong);
                continue;
            }
            accepted.push(CopyItem {
                record,
                destination,
                mapping: Arc::clone(mapping),
            });
        }
        accepted
    }
}
