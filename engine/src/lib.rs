//! # Mirror Engine - Incremental Backup Library
//!
//! A headless engine that mirrors files from source roots to destination
//! roots, copying only what changed. The CLI is a thin front end over it.
//!
//! ## Overview
//!
//! One run is a pipeline:
//! - Scan every source root (external file index first, directory walk as fallback)
//! - Filter by modification-time cutoff, size limit and path length
//! - Partition into batches of small files and single large files
//! - Copy on a pool of worker threads, skipping unchanged destinations
//! - Verify a random sample of the copied files
//!
//! Progress is reported through callbacks and every event is logged with
//! `tracing`; run events use the [`RUN_TARGET`] target and unreadable files
//! the [`LOST_TARGET`] target so front ends can route them to separate sinks.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{BackupConfig, BackupRun, IgnoreRules};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::load_or_create(Path::new("config/config.json"))?;
//! let rules = IgnoreRules::load_or_create(&config.ignore_file)?;
//!
//! let report = BackupRun::new(config, rules).execute()?;
//! println!(
//!     "copied {}, skipped {}, failed {}",
//!     report.stats.copied, report.stats.skipped, report.stats.failed
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (FileRecord, BackupMapping, CopyUnit, CopyOutcome)
//! - **error**: Error types and handling
//! - **config**: JSON configuration with defaults
//! - **ignore**: Exclusion rules
//! - **source**: Candidate enumeration (walk and index providers)
//! - **filter**: Incremental, size and path-length filter
//! - **partition**: Batching of small files
//! - **executor**: Worker pool and abort handling
//! - **fs_ops**: Per-file copy with metadata preservation
//! - **verify**: Post-run verification sampling
//! - **stats**: Run counters
//! - **availability**: Root availability checks and waiting
//! - **pipeline**: Run orchestration
//! - **progress**: Progress callback trait
//! - **checksums**: Checksum computation

pub mod availability;
pub mod checksums;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod fs_ops;
pub mod ignore;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod stats;
pub mod verify;

/// Tracing target of the run stream (start, per-file results, totals).
pub const RUN_TARGET: &str = "mirror::run";

/// Tracing target of the lost-files stream (files that could not be read).
pub const LOST_TARGET: &str = "mirror::lost";

// Re-export main types and functions
pub use availability::{wait_for_roots, FsAvailability, RootAvailability};
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::{BackupConfig, ParallelConfig};
pub use error::{EngineError, IndexError, ProviderUnavailable};
pub use executor::{AbortSignal, BackupExecutor};
pub use filter::{Cutoff, IncrementalFilter, MAX_PATH_CHARS};
pub use ignore::IgnoreRules;
pub use model::{
    BackupMapping, CopyItem, CopyOutcome, CopyStatus, CopyUnit, FileRecord, SkipReason,
    VerificationResult,
};
pub use partition::partition;
pub use pipeline::{BackupRun, RunReport};
pub use progress::{NoProgress, ProgressCallback};
pub use source::{
    FileIndex, IndexEntry, IndexedProvider, ListingIndex, ScanErrors, SourceProvider, WalkProvider,
};
pub use stats::{RunStats, StatsAggregator};
pub use verify::VerificationSampler;
