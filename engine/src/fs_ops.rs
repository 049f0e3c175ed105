//! Filesystem operations module.
//!
//! This module provides the per-file copier:
//! - Deciding whether a destination is out of date
//! - Copying files with modification time preservation
//! - Creating destination directories recursively
//! - Extended-length path handling on Windows

use crate::error::EngineError;
use crate::model::{CopyItem, CopyOutcome, FileRecord, SkipReason};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Paths at least this long get the extended-length prefix on Windows.
#[cfg(windows)]
const LONG_PATH_THRESHOLD: usize = 248;

/// Whole seconds since the Unix epoch, the resolution mtimes are compared at.
pub fn mtime_seconds(time: SystemTime) -> i64 {
    FileTime::from_system_time(time).unix_seconds()
}

/// Whether `dest` must be (re)written from the file described by `src`.
///
/// True when the destination is missing, differs in size, or is older than
/// the source at whole-second resolution. A destination that cannot be
/// inspected for any other reason is treated as out of date.
pub fn needs_update(src: &FileRecord, dest: &Path) -> bool {
    match fs::metadata(long_path(dest)) {
        Ok(metadata) => {
            if metadata.len() != src.size_bytes {
                return true;
            }
            match metadata.modified() {
                Ok(dest_mtime) => mtime_seconds(src.modified) > mtime_seconds(dest_mtime),
                Err(_) => true,
            }
        }
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %dest.display(), error = %e, "Destination stat failed");
            }
            true
        }
    }
}

/// Copy one item, reporting the result as an outcome.
///
/// Never panics and never returns an error: I/O failures become a `Failed`
/// outcome carrying the error message and OS code.
pub fn copy_file(item: CopyItem) -> CopyOutcome {
    if !needs_update(&item.record, &item.destination) {
        return CopyOutcome::skipped(item, SkipReason::Unchanged);
    }
    match copy_file_with_metadata(&item.record.absolute_path, &item.destination) {
        Ok(bytes) => CopyOutcome::copied(item, bytes),
        Err(e) => CopyOutcome::failed(item, &e),
    }
}

/// Copy a file from source to destination with metadata preservation.
///
/// # Arguments
/// * `src` - Source file path
/// * `dst` - Destination file path
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails or the source modification time
/// cannot be applied to the destination
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(long_path(src)).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    // Get source metadata for modification time
    let src_metadata = src_file.metadata().map_err(|e| EngineError::MetadataError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = src_metadata
        .modified()
        .map_err(|e| EngineError::MetadataError {
            path: src.to_path_buf(),
            source: e,
        })?;

    let dst_long = long_path(dst);
    let mut dst_file = fs::File::create(&dst_long).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    filetime::set_file_mtime(&dst_long, FileTime::from_system_time(src_mtime)).map_err(|e| {
        EngineError::MetadataError {
            path: dst.to_path_buf(),
            source: e,
        }
    })?;

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// Safe to call from several workers for the same directory at once.
///
/// # Errors
/// Returns EngineError if directory creation fails or an ancestor exists
/// as something other than a directory
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    // Skip if parent is empty path (Windows root or relative root)
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(long_path(parent)) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // create_dir_all treats a directory created concurrently as success
            fs::create_dir_all(long_path(parent)).map_err(|e| {
                EngineError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                }
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Path suitable for OS calls.
///
/// On Windows, absolute paths of 248 or more characters get the `\\?\`
/// extended-length prefix. Elsewhere the path is returned unchanged.
#[cfg(windows)]
pub fn long_path(path: &Path) -> PathBuf {
    let text = path.as_os_str().to_string_lossy();
    if text.starts_with(r"\\?\") || !path.is_absolute() || text.chars().count() < LONG_PATH_THRESHOLD
    {
        return path.to_path_buf();
    }
    if let Some(share) = text.strip_prefix(r"\\") {
        PathBuf::from(format!(r"\\?\UNC\{}", share))
    } else {
        PathBuf::from(format!(r"\\?\{}", text))
    }
}

#[cfg(not(windows))]
pub fn long_path(path: &Path) -> PathBuf {
    path.to_path_buf()
}
