//! Exclusion rules.
//!
//! One rule per line; blank lines and lines starting with `#` are ignored.
//! Matching is case-insensitive. Rules come in three kinds:
//!
//! - `node_modules`, `.git`: no wildcard and no separator, matches any path
//!   component with that name
//! - `*.tmp`, `~*`: contains `*`, `?` or `[`, matched against the final
//!   path component
//! - `build/output`: contains a separator, matched against the path at any
//!   directory boundary
//!
//! A single trailing `/` or `\` restricts a rule to directories. Paths given to
//! the matcher are relative to the root being scanned.

use crate::error::EngineError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path};

/// Rules written when no rule file exists yet.
pub const DEFAULT_RULES: &str = "\
# System files and directories
$RECYCLE.BIN/
System Volume Information/
pagefile.sys
hiberfil.sys
swapfile.sys

# Version control and editors
.git/
.svn/
node_modules/
.idea/
.vscode/
__pycache__/

# Temporary files
*.tmp
*.temp
*.bak
~*

# Caches
Temp/
Cache/
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Name,
    Glob,
    Path,
}

/// A pair of glob sets: rules that match anything, and directory-only rules.
#[derive(Debug, Clone)]
struct RuleSet {
    any: GlobSet,
    dir_only: GlobSet,
}

impl RuleSet {
    fn is_match(&self, path: &Path, is_dir: bool) -> bool {
        self.any.is_match(path) || (is_dir && self.dir_only.is_match(path))
    }
}

struct RuleSetBuilder {
    any: GlobSetBuilder,
    dir_only: GlobSetBuilder,
}

impl RuleSetBuilder {
    fn new() -> Self {
        RuleSetBuilder {
            any: GlobSetBuilder::new(),
            dir_only: GlobSetBuilder::new(),
        }
    }

    fn add(&mut self, glob: globset::Glob, dir_only: bool) {
        if dir_only {
            self.dir_only.add(glob);
        } else {
            self.any.add(glob);
        }
    }

    fn build(self) -> Result<RuleSet, EngineError> {
        let err = |e| EngineError::IgnoreRule {
            rule: "(rule set)".to_string(),
            source: e,
        };
        Ok(RuleSet {
            any: self.any.build().map_err(err)?,
            dir_only: self.dir_only.build().map_err(err)?,
        })
    }
}

/// Compiled exclusion rules. Immutable and safe to share between threads.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    rules: Vec<String>,
    names: RuleSet,
    globs: RuleSet,
    paths: RuleSet,
}

fn classify(rule: &str) -> RuleKind {
    if rule.contains(['/', '\\']) {
        RuleKind::Path
    } else if rule.contains(['*', '?', '[']) {
        RuleKind::Glob
    } else {
        RuleKind::Name
    }
}

impl IgnoreRules {
    /// Compile rules from an iterator of rule lines.
    pub fn from_rules<I, S>(lines: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        let mut names = RuleSetBuilder::new();
        let mut globs = RuleSetBuilder::new();
        let mut paths = RuleSetBuilder::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let dir_only = line.ends_with(['/', '\\']);
            let body = line.strip_suffix(['/', '\\']).unwrap_or(line);
            if body.is_empty() {
                continue;
            }

            let kind = classify(body);
            let pattern = match kind {
                RuleKind::Name => globset::escape(body),
                RuleKind::Glob => body.to_string(),
                RuleKind::Path => {
                    let normalized = body.replace('\\', "/");
                    format!("**/{}", normalized.trim_start_matches('/'))
                }
            };
            let glob = GlobBuilder::new(&pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| EngineError::IgnoreRule {
                    rule: line.to_string(),
                    source: e,
                })?;
            match kind {
                RuleKind::Name => names.add(glob, dir_only),
                RuleKind::Glob => globs.add(glob, dir_only),
                RuleKind::Path => paths.add(glob, dir_only),
            }
            rules.push(line.to_string());
        }

        tracing::debug!(count = rules.len(), "Loaded ignore rules");
        Ok(IgnoreRules {
            rules,
            names: names.build()?,
            globs: globs.build()?,
            paths: paths.build()?,
        })
    }

    /// Compile rules from the text of a rule file.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        Self::from_rules(text.lines())
    }

    /// Rules that match nothing.
    pub fn empty() -> Self {
        let none = || RuleSet {
            any: GlobSet::empty(),
            dir_only: GlobSet::empty(),
        };
        IgnoreRules {
            rules: Vec::new(),
            names: none(),
            globs: none(),
            paths: none(),
        }
    }

    /// Load a rule file, writing `DEFAULT_RULES` to it first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, EngineError> {
        let io_err = |e| EngineError::IgnoreFile {
            path: path.to_path_buf(),
            source: e,
        };
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
            }
            fs::write(path, DEFAULT_RULES).map_err(io_err)?;
            tracing::info!(path = %path.display(), "Created default ignore rules");
        }
        let text = fs::read_to_string(path).map_err(io_err)?;
        Self::parse(&text)
    }

    /// Rule lines in the order they were loaded
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the entry at `path` itself matches a rule.
    ///
    /// A directory that matches excludes its whole subtree; walkers call this
    /// before descending.
    pub fn matches(&self, path: &Path, is_dir: bool) -> bool {
        let components: Vec<&OsStr> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect();
        let Some(last) = components.len().checked_sub(1) else {
            return false;
        };

        for (i, name) in components.iter().enumerate() {
            let component_is_dir = i < last || is_dir;
            if self.names.is_match(Path::new(name), component_is_dir) {
                return true;
            }
        }
        if self.globs.is_match(Path::new(components[last]), is_dir) {
            return true;
        }
        self.paths.is_match(path, is_dir)
    }

    /// Whether `path` or any of its ancestors matches a rule.
    ///
    /// For flat listings (index results) where no walk pruned the parents.
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.matches(path, is_dir) {
            return true;
        }
        path.ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.matches(a, true))
    }
}
