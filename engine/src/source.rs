//! Candidate enumeration.
//!
//! A `SourceProvider` lists the regular files under one source root that are
//! not excluded by the ignore rules. Two providers exist:
//! - `WalkProvider`: walks the tree, pruning ignored directories
//! - `IndexedProvider`: asks a prebuilt `FileIndex`, re-checking each entry
//!
//! Entries that cannot be read are counted in `ScanErrors` and reported on the
//! lost-files stream; they never stop the listing.

use crate::error::{IndexError, ProviderUnavailable};
use crate::ignore::IgnoreRules;
use crate::model::FileRecord;
use crate::LOST_TARGET;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

/// Lists candidate files under a source root.
pub trait SourceProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Enumerate files under `root`.
    ///
    /// The iterator is lazy and finite. Calling again starts a fresh listing.
    fn list_candidates<'a>(
        &'a self,
        root: &Path,
    ) -> Result<Box<dyn Iterator<Item = FileRecord> + 'a>, ProviderUnavailable>;
}

/// Counter of entries that could not be read while scanning.
#[derive(Debug, Clone, Default)]
pub struct ScanErrors(Arc<AtomicU64>);

impl ScanErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Return the current count and reset it to zero.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Build a record from filesystem metadata; `None` for anything but a file.
fn record_from_metadata(path: PathBuf, root: &Path, metadata: &fs::Metadata) -> Option<FileRecord> {
    if !metadata.is_file() {
        return None;
    }
    Some(FileRecord {
        absolute_path: path,
        size_bytes: metadata.len(),
        modified: metadata.modified().ok()?,
        source_root: root.to_path_buf(),
    })
}

/// Like `record_from_metadata`, reporting entries that yield no record.
fn checked_record(
    errors: &ScanErrors,
    path: PathBuf,
    root: &Path,
    metadata: &fs::Metadata,
) -> Option<FileRecord> {
    let reason = if metadata.is_file() {
        "modification time unavailable"
    } else {
        "not a regular file"
    };
    match record_from_metadata(path.clone(), root, metadata) {
        Some(record) => Some(record),
        None => {
            report_lost(errors, &path, &reason);
            None
        }
    }
}

fn report_lost(errors: &ScanErrors, path: &Path, reason: &dyn std::fmt::Display) {
    errors.increment();
    tracing::warn!(target: LOST_TARGET, path = %path.display(), "{}", reason);
}

/// Recursive directory walk.
pub struct WalkProvider {
    rules: Arc<IgnoreRules>,
    errors: ScanErrors,
}

impl WalkProvider {
    pub fn new(rules: Arc<IgnoreRules>, errors: ScanErrors) -> Self {
        WalkProvider { rules, errors }
    }
}

impl SourceProvider for WalkProvider {
    fn name(&self) -> &'static str {
        "walk"
    }

    fn list_candidates<'a>(
        &'a self,
        root: &Path,
    ) -> Result<Box<dyn Iterator<Item = FileRecord> + 'a>, ProviderUnavailable> {
        let root = root.to_path_buf();
        let filter_root = root.clone();
        let rules = Arc::clone(&self.rules);

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&filter_root)
                    .unwrap_or(entry.path());
                !rules.matches(relative, entry.file_type().is_dir())
            });

        let errors = &self.errors;
        let iter = walker.filter_map(move |entry| match entry {
            Ok(entry) => {
                let file_type = entry.file_type();
                let metadata = if file_type.is_symlink() {
                    // a link stands for its target; linked directories are not entered
                    match fs::metadata(entry.path()) {
                        Ok(metadata) if metadata.is_dir() => return None,
                        Ok(metadata) => metadata,
                        Err(e) => {
                            report_lost(errors, entry.path(), &e);
                            return None;
                        }
                    }
                } else if file_type.is_file() {
                    match entry.metadata() {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            report_lost(errors, entry.path(), &e);
                            return None;
                        }
                    }
                } else {
                    return None;
                };
                checked_record(errors, entry.path().to_path_buf(), &root, &metadata)
            }
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                report_lost(errors, &path, &e);
                None
            }
        });
        Ok(Box::new(iter))
    }
}

/// One file reported by an index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexEntry {
    pub path: PathBuf,
}

/// A prebuilt file index that can list the files under a root.
pub trait FileIndex: Send + Sync {
    fn query(&self, root: &Path) -> Result<Vec<IndexEntry>, IndexError>;
}

impl<T: FileIndex + ?Sized> FileIndex for Box<T> {
    fn query(&self, root: &Path) -> Result<Vec<IndexEntry>, IndexError> {
        (**self).query(root)
    }
}

#[derive(Debug, Deserialize)]
struct ListingFile {
    #[serde(default)]
    roots: Vec<PathBuf>,
    #[serde(default)]
    entries: Vec<IndexEntry>,
}

/// File index backed by a JSON listing export.
///
/// ```json
/// { "roots": ["/data/photos"], "entries": [{ "path": "/data/photos/a.jpg" }] }
/// ```
///
/// Only roots listed in `roots` (or below one) are considered indexed. The file
/// is read on every query so a refreshed export is picked up by the next run.
#[derive(Debug, Clone)]
pub struct ListingIndex {
    path: PathBuf,
}

impl ListingIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ListingIndex { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ListingFile, IndexError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IndexError::Missing {
                    path: self.path.clone(),
                }
            } else {
                IndexError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })?;
        serde_json::from_str(&text).map_err(|e| IndexError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl FileIndex for ListingIndex {
    fn query(&self, root: &Path) -> Result<Vec<IndexEntry>, IndexError> {
        let listing = self.read()?;
        if !listing.roots.iter().any(|r| root.starts_with(r)) {
            return Err(IndexError::RootNotIndexed {
                root: root.to_path_buf(),
            });
        }
        let mut seen = HashSet::new();
        Ok(listing
            .entries
            .into_iter()
            .filter(|e| e.path.starts_with(root) && e.path != root)
            .filter(|e| seen.insert(e.path.clone()))
            .collect())
    }
}

/// Provider that lists files from a `FileIndex`.
pub struct IndexedProvider<I: FileIndex> {
    index: I,
    rules: Arc<IgnoreRules>,
    errors: ScanErrors,
}

impl<I: FileIndex> IndexedProvider<I> {
    pub fn new(index: I, rules: Arc<IgnoreRules>, errors: ScanErrors) -> Self {
        IndexedProvider {
            index,
            rules,
            errors,
        }
    }
}

impl<I: FileIndex> SourceProvider for IndexedProvider<I> {
    fn name(&self) -> &'static str {
        "indexed"
    }

    fn list_candidates<'a>(
        &'a self,
        root: &Path,
    ) -> Result<Box<dyn Iterator<Item = FileRecord> + 'a>, ProviderUnavailable> {
        let entries = self.index.query(root).map_err(|e| ProviderUnavailable {
            provider: self.name(),
            root: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(root = %root.display(), entries = entries.len(), "Index query returned");

        let root = root.to_path_buf();
        let iter = entries.into_iter().filter_map(move |entry| {
            let relative = entry.path.strip_prefix(&root).ok()?;
            if self.rules.is_excluded(relative, false) {
                return None;
            }
            // the index may be stale; trust only what is on disk now
            match fs::metadata(&entry.path) {
                Ok(metadata) if metadata.is_dir() => None,
                Ok(metadata) => checked_record(&self.errors, entry.path, &root, &metadata),
                Err(e) => {
                    report_lost(&self.errors, &entry.path, &e);
                    None
                }
            }
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, data).expect("Failed to write file");
    }

    fn names(records: &[FileRecord], root: &Path) -> Vec<String> {
        let mut names: Vec<String> = records
            .iter()
            .map(|r| {
                r.absolute_path
                    .strip_prefix(root)
                    .expect("record under root")
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_walk_lists_files_and_prunes_ignored() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("src");
        write(&root.join("a.txt"), b"a");
        write(&root.join("docs/b.md"), b"bb");
        write(&root.join("scratch.tmp"), b"t");
        write(&root.join("node_modules/pkg/index.js"), b"x");

        let rules = Arc::new(IgnoreRules::parse("*.tmp\nnode_modules/").expect("rules"));
        let errors = ScanErrors::new();
        let provider = WalkProvider::new(rules, errors.clone());
        let records: Vec<_> = provider
            .list_candidates(&root)
            .expect("walk is always available")
            .collect();

        assert_eq!(names(&records, &root), vec!["a.txt", "docs/b.md"]);
        assert!(records.iter().all(|r| r.source_root == root));
        let b = records
            .iter()
            .find(|r| r.absolute_path.ends_with("b.md"))
            .expect("b.md listed");
        assert_eq!(b.size_bytes, 2);
        assert_eq!(errors.count(), 0);
    }

    #[test]
    fn test_walk_root_matching_rule_is_not_excluded() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("Cache");
        write(&root.join("keep.bin"), b"k");

        let rules = Arc::new(IgnoreRules::parse("Cache/").expect("rules"));
        let provider = WalkProvider::new(rules, ScanErrors::new());
        let records: Vec<_> = provider.list_candidates(&root).expect("walk").collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_walk_missing_root_is_soft_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let errors = ScanErrors::new();
        let provider = WalkProvider::new(Arc::new(IgnoreRules::empty()), errors.clone());
        let records: Vec<_> = provider
            .list_candidates(&temp_dir.path().join("missing"))
            .expect("walk")
            .collect();
        assert!(records.is_empty());
        assert_eq!(errors.take(), 1);
        assert_eq!(errors.count(), 0);
    }

    #[test]
    fn test_walk_is_restartable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        write(&temp_dir.path().join("one"), b"1");
        let provider = WalkProvider::new(Arc::new(IgnoreRules::empty()), ScanErrors::new());
        let first = provider.list_candidates(temp_dir.path()).expect("walk").count();
        let second = provider.list_candidates(temp_dir.path()).expect("walk").count();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_follows_file_links_and_reports_dangling_ones() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("src");
        write(&root.join("ok"), b"ok");
        write(&temp_dir.path().join("outside.txt"), b"linked");
        fs::create_dir_all(temp_dir.path().join("outside_dir")).expect("Failed to create dir");
        symlink(temp_dir.path().join("outside.txt"), root.join("file_link"))
            .expect("Failed to create link");
        symlink(temp_dir.path().join("nowhere"), root.join("dangling"))
            .expect("Failed to create link");
        symlink(temp_dir.path().join("outside_dir"), root.join("dir_link"))
            .expect("Failed to create link");

        let errors = ScanErrors::new();
        let provider = WalkProvider::new(Arc::new(IgnoreRules::empty()), errors.clone());
        let records: Vec<_> = provider.list_candidates(&root).expect("walk").collect();

        assert_eq!(names(&records, &root), vec!["file_link", "ok"]);
        let linked = records
            .iter()
            .find(|r| r.absolute_path.ends_with("file_link"))
            .expect("link listed");
        assert_eq!(linked.size_bytes, 6);
        assert_eq!(errors.count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_indexed_reports_dangling_link() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("src");
        write(&root.join("ok"), b"ok");
        symlink(temp_dir.path().join("nowhere"), root.join("dangling"))
            .expect("Failed to create link");
        let listing = temp_dir.path().join("index.json");
        write_listing(
            &listing,
            &[root.as_path()],
            &[root.join("ok"), root.join("dangling")],
        );

        let errors = ScanErrors::new();
        let provider = IndexedProvider::new(
            ListingIndex::new(&listing),
            Arc::new(IgnoreRules::empty()),
            errors.clone(),
        );
        let records: Vec<_> = provider.list_candidates(&root).expect("indexed").collect();
        assert_eq!(names(&records, &root), vec!["ok"]);
        assert_eq!(errors.count(), 1);
    }

    fn write_listing(path: &Path, roots: &[&Path], entries: &[PathBuf]) {
        let json = serde_json::json!({
            "roots": roots,
            "entries": entries.iter().map(|p| serde_json::json!({ "path": p })).collect::<Vec<_>>(),
        });
        fs::write(path, json.to_string()).expect("Failed to write listing");
    }

    #[test]
    fn test_indexed_restats_and_reports_stale_entries() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("src");
        write(&root.join("a.txt"), b"aaa");
        write(&root.join("skip.tmp"), b"t");
        let listing = temp_dir.path().join("index.json");
        write_listing(
            &listing,
            &[root.as_path()],
            &[
                root.join("a.txt"),
                root.join("a.txt"),
                root.join("gone.txt"),
                root.join("skip.tmp"),
                temp_dir.path().join("elsewhere.txt"),
            ],
        );

        let errors = ScanErrors::new();
        let provider = IndexedProvider::new(
            ListingIndex::new(&listing),
            Arc::new(IgnoreRules::parse("*.tmp").expect("rules")),
            errors.clone(),
        );
        let records: Vec<_> = provider.list_candidates(&root).expect("indexed").collect();
        assert_eq!(names(&records, &root), vec!["a.txt"]);
        assert_eq!(records[0].size_bytes, 3);
        assert_eq!(errors.count(), 1);
    }

    #[test]
    fn test_indexed_unavailable_when_root_not_covered() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let listing = temp_dir.path().join("index.json");
        write_listing(&listing, &[Path::new("/somewhere/else")], &[]);

        let provider = IndexedProvider::new(
            ListingIndex::new(&listing),
            Arc::new(IgnoreRules::empty()),
            ScanErrors::new(),
        );
        let err = provider
            .list_candidates(temp_dir.path())
            .err()
            .expect("root is not indexed");
        assert_eq!(err.provider, "indexed");
    }

    #[test]
    fn test_indexed_unavailable_when_listing_missing_or_malformed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let missing = ListingIndex::new(temp_dir.path().join("none.json"));
        assert!(matches!(
            missing.query(temp_dir.path()),
            Err(IndexError::Missing { .. })
        ));

        let bad = temp_dir.path().join("bad.json");
        fs::write(&bad, "[1, 2").expect("Failed to write listing");
        assert!(matches!(
            ListingIndex::new(&bad).query(temp_dir.path()),
            Err(IndexError::Parse { .. })
        ));
    }
}
