//! Root availability checks.
//!
//! Source and destination roots often live on removable or network drives.
//! A root is available when it exists, is a directory, and can be listed.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Answers whether a source or destination root can be used right now.
pub trait RootAvailability: Send + Sync {
    fn is_available(&self, root: &Path) -> bool;
}

/// Availability as seen by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAvailability;

impl RootAvailability for FsAvailability {
    fn is_available(&self, root: &Path) -> bool {
        match fs::metadata(root) {
            Ok(metadata) if metadata.is_dir() => fs::read_dir(root).is_ok(),
            _ => false,
        }
    }
}

/// Poll until every root is available or `timeout` elapses.
///
/// Returns the roots that were still unavailable when polling stopped; an
/// empty result means all of them came up.
pub fn wait_for_roots<A: RootAvailability + ?Sized>(
    check: &A,
    roots: &[PathBuf],
    timeout: Duration,
    poll_interval: Duration,
) -> Vec<PathBuf> {
    let deadline = Instant::now() + timeout;
    let mut pending: Vec<PathBuf> = roots.to_vec();
    loop {
        pending.retain(|root| !check.is_available(root));
        if pending.is_empty() {
            return pending;
        }
        let now = Instant::now();
        if now >= deadline {
            for root in &pending {
                tracing::warn!(root = %root.display(), "Root still unavailable after waiting");
            }
            return pending;
        }
        tracing::debug!(pending = pending.len(), "Waiting for roots to become available");
        thread::sleep(poll_interval.min(deadline - now));
    }
}
