//! Run configuration.
//!
//! Loaded from a JSON file. Every field has a default, so a partial file is
//! merged over the defaults; a missing file is created with the defaults.

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::model::BackupMapping;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound for the worker pool, explicit or derived.
pub const MAX_WORKERS: usize = 64;

/// Upper bound for the derived worker count.
const AUTO_WORKERS_CAP: usize = 32;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Top-level configuration of a backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Source root → destination root
    pub sources: BTreeMap<PathBuf, PathBuf>,

    /// Files larger than this are not copied
    pub file_size_limit_mb: u64,

    /// Only files modified in the last N days are copied; 0 means full backup
    pub incremental_days: u32,

    /// Number of copied files re-checked after the run
    pub verification_sample_size: usize,

    /// Also compare content checksums when verifying
    pub verify_checksum: Option<ChecksumAlgorithm>,

    /// Text file with ignore rules
    pub ignore_file: PathBuf,

    /// JSON export of an external file index, tried before walking
    pub index_file: Option<PathBuf>,

    /// Directory for log files
    pub log_dir: PathBuf,

    pub parallel: ParallelConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            sources: BTreeMap::new(),
            file_size_limit_mb: 100,
            incremental_days: 0,
            verification_sample_size: 2,
            verify_checksum: None,
            ignore_file: PathBuf::from("config/ignore.txt"),
            index_file: None,
            log_dir: PathBuf::from("logs"),
            parallel: ParallelConfig::default(),
        }
    }
}

/// Worker pool and partitioning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,

    /// `None` derives the pool size from available parallelism
    pub max_workers: Option<usize>,

    /// Files below this size are copied in batches
    pub small_file_size_mb: u64,

    /// Maximum number of files per batch
    pub batch_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            enabled: true,
            max_workers: None,
            small_file_size_mb: 1,
            batch_size: 50,
        }
    }
}

impl ParallelConfig {
    /// Resolve the worker count for one run.
    pub fn resolve_workers(&self) -> usize {
        if !self.enabled {
            return 1;
        }
        match self.max_workers {
            Some(n) => n.clamp(1, MAX_WORKERS),
            None => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                (cores * 4).min(AUTO_WORKERS_CAP)
            }
        }
    }

    pub fn small_file_threshold_bytes(&self) -> u64 {
        self.small_file_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

impl BackupConfig {
    /// Read a configuration file, merging it over the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::ConfigIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| EngineError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Read a configuration file, writing the defaults first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            let config = BackupConfig::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Created default configuration");
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let io_err = |e| EngineError::ConfigIo {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| EngineError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, text).map_err(io_err)
    }

    pub fn file_size_limit_bytes(&self) -> u64 {
        self.file_size_limit_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Configured mappings in source-root order.
    pub fn mappings(&self) -> Vec<BackupMapping> {
        self.sources
            .iter()
            .map(|(src, dst)| BackupMapping::new(src.clone(), dst.clone()))
            .collect()
    }

    /// Check that the configuration can drive a run at all.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sources.is_empty() {
            return Err(EngineError::FatalConfig {
                reason: "no backup sources configured".to_string(),
            });
        }
        for (src, dst) in &self.sources {
            if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
                return Err(EngineError::FatalConfig {
                    reason: format!(
                        "mapping '{}' -> '{}' has an empty path",
                        src.display(),
                        dst.display()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Pairs of mappings whose source roots contain one another.
    pub fn overlapping_sources(&self) -> Vec<(PathBuf, PathBuf)> {
        let mappings = self.mappings();
        let mut pairs = Vec::new();
        for (i, a) in mappings.iter().enumerate() {
            for b in &mappings[i + 1..] {
                if a.overlaps(b) {
                    pairs.push((a.source_root.clone(), b.source_root.clone()));
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_merges_defaults() {
        let json = r#"{ "sources": { "/a": "/b" }, "incremental_days": 7,
                        "parallel": { "batch_size": 10 } }"#;
        let config: BackupConfig = serde_json::from_str(json).expect("valid config");
        assert_eq!(config.incremental_days, 7);
        assert_eq!(config.file_size_limit_mb, 100);
        assert_eq!(config.parallel.batch_size, 10);
        assert!(config.parallel.enabled);
        assert_eq!(config.parallel.max_workers, None);
        assert_eq!(config.mappings(), vec![BackupMapping::new("/a", "/b")]);
    }

    #[test]
    fn test_checksum_algorithm_field() {
        let json = r#"{ "verify_checksum": "blake3" }"#;
        let config: BackupConfig = serde_json::from_str(json).expect("valid config");
        assert_eq!(config.verify_checksum, Some(ChecksumAlgorithm::Blake3));
    }

    #[test]
    fn test_validate_rejects_empty_sources() {
        let config = BackupConfig::default();
        assert!(matches!(
            config.validate(),
            Err(EngineError::FatalConfig { .. })
        ));
    }

    #[test]
    fn test_resolve_workers() {
        let mut parallel = ParallelConfig::default();
        let auto = parallel.resolve_workers();
        assert!((1..=AUTO_WORKERS_CAP).contains(&auto));

        parallel.max_workers = Some(0);
        assert_eq!(parallel.resolve_workers(), 1);
        parallel.max_workers = Some(10_000);
        assert_eq!(parallel.resolve_workers(), MAX_WORKERS);
        parallel.max_workers = Some(6);
        assert_eq!(parallel.resolve_workers(), 6);

        parallel.enabled = false;
        assert_eq!(parallel.resolve_workers(), 1);
    }

    #[test]
    fn test_overlapping_sources() {
        let mut config = BackupConfig::default();
        config.sources.insert(PathBuf::from("/data"), PathBuf::from("/b1"));
        config
            .sources
            .insert(PathBuf::from("/data/photos"), PathBuf::from("/b2"));
        config.sources.insert(PathBuf::from("/music"), PathBuf::from("/b3"));
        let pairs = config.overlapping_sources();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, PathBuf::from("/data"));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config").join("config.json");

        let config = BackupConfig::load_or_create(&path).expect("Failed to create config");
        assert!(path.exists());
        assert_eq!(config, BackupConfig::default());

        let reloaded = BackupConfig::load(&path).expect("Failed to reload config");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("Failed to write config");
        assert!(matches!(
            BackupConfig::load(&path),
            Err(EngineError::ConfigParse { .. })
        ));
    }
}
