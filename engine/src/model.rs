//! Core data model for a mirror run.
//!
//! This module defines the values that flow through the pipeline:
//! - FileRecord: one candidate file as reported by a source provider
//! - BackupMapping: a configured source root → destination root pair
//! - CopyItem / CopyUnit: filtered files and the units of work built from them
//! - CopyOutcome, CopyStatus, SkipReason: what happened to one file
//! - VerificationResult: one sampled integrity check

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A file found under a source root.
///
/// Produced by a `SourceProvider` and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Full source path (identity of the record)
    pub absolute_path: PathBuf,

    /// File size in bytes at scan time
    pub size_bytes: u64,

    /// Last modification time at scan time
    pub modified: SystemTime,

    /// Root the file was found under
    pub source_root: PathBuf,
}

/// One configured source root → destination root pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupMapping {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
}

impl BackupMapping {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        BackupMapping {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
        }
    }

    /// Destination for a file under this mapping's source root.
    ///
    /// Returns `None` when `path` is not below `source_root`.
    pub fn destination_for(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.source_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.destination_root.join(relative))
    }

    /// True when one of the two source roots contains the other.
    pub fn overlaps(&self, other: &BackupMapping) -> bool {
        self.source_root.starts_with(&other.source_root)
            || other.source_root.starts_with(&self.source_root)
    }
}

/// A filtered file together with where it should be copied to.
#[derive(Debug, Clone)]
pub struct CopyItem {
    pub record: FileRecord,
    pub destination: PathBuf,
    pub mapping: Arc<BackupMapping>,
}

/// A unit of work for the executor.
#[derive(Debug)]
pub enum CopyUnit {
    /// Small files copied one after another by a single worker
    Batch { items: Vec<CopyItem> },
    /// One large file scheduled on its own
    Single { item: CopyItem },
}

impl CopyUnit {
    /// Number of files in this unit
    pub fn len(&self) -> usize {
        match self {
            CopyUnit::Batch { items } => items.len(),
            CopyUnit::Single { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&CopyItem> {
        match self {
            CopyUnit::Batch { items } => items.first(),
            CopyUnit::Single { item } => Some(item),
        }
    }

    /// Consume the unit, yielding its items in order.
    pub fn into_items(self) -> Vec<CopyItem> {
        match self {
            CopyUnit::Batch { items } => items,
            CopyUnit::Single { item } => vec![item],
        }
    }
}

/// Final state of one file in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyStatus {
    /// Written to the destination
    Copied,
    /// Not written (see `SkipReason`)
    Skipped,
    /// An I/O error prevented the copy
    Failed,
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyStatus::Copied => write!(f, "copied"),
            CopyStatus::Skipped => write!(f, "skipped"),
            CopyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a file was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Destination already has the same size and an equal or newer mtime
    Unchanged,
    /// Larger than the configured size limit
    TooLarge,
    /// Source or destination path longer than the path limit
    PathTooLong,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unchanged => write!(f, "unchanged"),
            SkipReason::TooLarge => write!(f, "too large"),
            SkipReason::PathTooLong => write!(f, "path too long"),
        }
    }
}

/// Result of handing one `CopyItem` to the copier.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub item: CopyItem,
    pub status: CopyStatus,
    pub skip_reason: Option<SkipReason>,
    /// OS error code if status is Failed
    pub error_code: Option<u32>,
    /// Human-readable error message if status is Failed
    pub error_detail: Option<String>,
    pub bytes_copied: u64,
}

impl CopyOutcome {
    pub fn copied(item: CopyItem, bytes_copied: u64) -> Self {
        CopyOutcome {
            item,
            status: CopyStatus::Copied,
            skip_reason: None,
            error_code: None,
            error_detail: None,
            bytes_copied,
        }
    }

    pub fn skipped(item: CopyItem, reason: SkipReason) -> Self {
        CopyOutcome {
            item,
            status: CopyStatus::Skipped,
            skip_reason: Some(reason),
            error_code: None,
            error_detail: None,
            bytes_copied: 0,
        }
    }

    pub fn failed(item: CopyItem, error: &crate::error::EngineError) -> Self {
        CopyOutcome {
            item,
            status: CopyStatus::Failed,
            skip_reason: None,
            error_code: error.raw_os_error(),
            error_detail: Some(error.to_string()),
            bytes_copied: 0,
        }
    }

    /// Source path of the file this outcome is about
    pub fn source_path(&self) -> &Path {
        &self.item.record.absolute_path
    }
}

/// One sampled post-copy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub path: PathBuf,
    pub destination: PathBuf,
    pub matched: bool,
    pub mismatch_reason: Option<String>,
}
