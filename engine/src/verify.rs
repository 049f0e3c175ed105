//! Post-run verification sampling.
//!
//! A few copied files are picked at random and compared with their source:
//! size and modification time always, content checksum when configured.
//! Mismatches are reported, never repaired.

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm};
use crate::fs_ops::{long_path, mtime_seconds};
use crate::model::{CopyOutcome, CopyStatus, VerificationResult};
use crate::RUN_TARGET;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct VerificationSampler {
    sample_size: usize,
    checksum: Option<ChecksumAlgorithm>,
}

impl VerificationSampler {
    pub fn new(sample_size: usize, checksum: Option<ChecksumAlgorithm>) -> Self {
        VerificationSampler {
            sample_size,
            checksum,
        }
    }

    /// Verify a uniform sample of the copied outcomes.
    pub fn verify(&self, outcomes: &[CopyOutcome]) -> Vec<VerificationResult> {
        self.verify_with_rng(outcomes, &mut rand::thread_rng())
    }

    /// Same as `verify`, drawing the sample from `rng`.
    pub fn verify_with_rng<R: Rng + ?Sized>(
        &self,
        outcomes: &[CopyOutcome],
        rng: &mut R,
    ) -> Vec<VerificationResult> {
        let copied: Vec<&CopyOutcome> = outcomes
            .iter()
            .filter(|o| o.status == CopyStatus::Copied)
            .collect();
        let count = self.sample_size.min(copied.len());
        if count == 0 {
            return Vec::new();
        }

        copied
            .choose_multiple(rng, count)
            .map(|outcome| {
                let result = self.check(
                    &outcome.item.record.absolute_path,
                    &outcome.item.destination,
                );
                match &result.mismatch_reason {
                    None => tracing::info!(
                        target: RUN_TARGET,
                        path = %result.path.display(),
                        "Verified"
                    ),
                    Some(reason) => tracing::warn!(
                        target: RUN_TARGET,
                        path = %result.path.display(),
                        "Verification failed: {}",
                        reason
                    ),
                }
                result
            })
            .collect()
    }

    /// Compare one source file with its copy.
    pub fn check(&self, source: &Path, destination: &Path) -> VerificationResult {
        let mismatch_reason = self.mismatch(source, destination).err();
        VerificationResult {
            path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            matched: mismatch_reason.is_none(),
            mismatch_reason,
        }
    }

    fn mismatch(&self, source: &Path, destination: &Path) -> Result<(), String> {
        let src = fs::metadata(long_path(source))
            .map_err(|e| format!("source unreadable: {}", e))?;
        let dst = fs::metadata(long_path(destination))
            .map_err(|e| format!("destination unreadable: {}", e))?;

        if src.len() != dst.len() {
            return Err(format!("size differs ({} vs {})", src.len(), dst.len()));
        }
        let src_mtime = src.modified().map_err(|e| e.to_string())?;
        let dst_mtime = dst.modified().map_err(|e| e.to_string())?;
        if mtime_seconds(src_mtime) != mtime_seconds(dst_mtime) {
            return Err("modification time differs".to_string());
        }

        if let Some(algorithm) = self.checksum {
            let a = compute_file_checksum(&long_path(source), algorithm)
                .map_err(|e| e.to_string())?;
            let b = compute_file_checksum(&long_path(destination), algorithm)
                .map_err(|e| e.to_string())?;
            if a != b {
                return Err(format!("{} checksum differs", algorithm));
            }
        }
        Ok(())
    }
}
