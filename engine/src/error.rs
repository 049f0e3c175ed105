//! Error types for the mirror engine.
//!
//! `EngineError` covers run-level failures (bad configuration, unreadable rule
//! files) and the per-file I/O failures raised inside the copier. Per-file
//! errors never leave a worker: they are folded into a `CopyOutcome`.
//! Source providers and file indexes have their own small error types so the
//! pipeline can tell "fall back to walking" apart from everything else.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration is unusable; the run stops before any scanning.
    #[error("Fatal configuration error: {reason}")]
    FatalConfig { reason: String },

    /// Configuration file could not be read or written
    #[error("Configuration file {}: {source}", path.display())]
    ConfigIo { path: PathBuf, source: io::Error },

    /// Configuration file is not valid JSON for `BackupConfig`
    #[error("Invalid configuration file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// An ignore rule failed to compile
    #[error("Invalid ignore rule '{rule}': {source}")]
    IgnoreRule { rule: String, source: globset::Error },

    /// Ignore rule file could not be read or created
    #[error("Ignore rule file {}: {source}", path.display())]
    IgnoreFile { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read file: {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to destination file
    #[error("Failed to write file: {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to stat a file or set its metadata
    #[error("Failed to access metadata: {}: {source}", path.display())]
    MetadataError { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::ConfigIo { source, .. }
            | Self::IgnoreFile { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::MetadataError { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => {
                source.raw_os_error().map(|e| e as u32)
            }
            _ => None,
        }
    }
}

/// A source provider cannot serve a root at all.
///
/// Returned instead of a partial listing so callers never mistake a broken
/// index for an empty directory.
#[derive(Error, Debug)]
#[error("{provider} provider unavailable for {}: {reason}", root.display())]
pub struct ProviderUnavailable {
    pub provider: &'static str,
    pub root: PathBuf,
    pub reason: String,
}

/// Failures of an external file index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The index export does not exist
    #[error("index file not found: {}", path.display())]
    Missing { path: PathBuf },

    /// The index could not be read
    #[error("failed to read index {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The index is malformed
    #[error("malformed index {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The index does not cover the requested root
    #[error("root {} is not indexed", root.display())]
    RootNotIndexed { root: PathBuf },
}
