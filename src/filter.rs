//! Admission filtering for ingestion and CLI scoping
//!
//! Two orthogonal filters combine conjunctively:
//! - the directory filter admits paths inside an include root and not
//!   matching any exclude pattern;
//! - the file filter rejects blacklist matches unless a whitelist pattern
//!   provides an exception.
//!
//! Path-safety checks for config merging live here too: a path is within
//! an allowed root iff, after absolute-path normalization, it equals the
//! root or sits under it separator-aligned. Every comparison happens on
//! an absolute basis; `.` and `~` are expanded first so a shorthand
//! include root never degenerates into a match-everything prefix.

use std::path::{Component, Path, PathBuf};

use globset::Glob;
use regex::Regex;
use tracing::debug;

/// Lexically resolve `.` and `..` components without touching the
/// filesystem
fn clean_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Normalize a path for comparison: expand `~`, make it absolute against
/// the current directory, and resolve `.`/`..` components. `.` therefore
/// means the current directory, never an empty prefix.
pub fn normalize_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };
    clean_components(&absolute)
}

/// Resolve a path declared in a config file against the directory that
/// declared it: `~` expands, absolute paths pass through, relative paths
/// join onto `config_dir`
pub fn resolve_relative_path(config_dir: &Path, path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        clean_components(&expanded)
    } else {
        clean_components(&config_dir.join(expanded))
    }
}

/// True iff `path` equals `root` or lives under it, separator-aligned.
/// Both sides are normalized first; a root that normalizes to nothing
/// never matches.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(root);
    if root.as_os_str().is_empty() || path.as_os_str().is_empty() {
        return false;
    }
    path == root || path.starts_with(&root)
}

/// Validate that every local include path is inside some global include.
/// Local paths are resolved relative to the local config's own directory
/// before the check; this is what keeps a project-local config from
/// widening the search scope past the global includes.
pub fn validate_includes_within_global(
    local_includes: &[String],
    global_includes: &[String],
    config_dir: &Path,
) -> Result<(), String> {
    for local in local_includes {
        let resolved = resolve_relative_path(config_dir, Path::new(local));
        let ok = global_includes
            .iter()
            .any(|global| is_within_root(&resolved, Path::new(global)));
        if !ok {
            return Err(format!(
                "local include path {} is not within global include scope",
                local
            ));
        }
    }
    Ok(())
}

/// Directory-level admission: include roots and exclude patterns
#[derive(Debug, Clone, Default)]
pub struct DirectoryFilter {
    include: Vec<PathBuf>,
    exclude: Vec<String>,
}

impl DirectoryFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include
                .iter()
                .map(|p| normalize_path(Path::new(p)))
                .collect(),
            exclude: exclude.to_vec(),
        }
    }

    /// Admit iff the path is inside some include root and matches no
    /// exclude pattern. Exclude patterns glob-match the basename; invalid
    /// globs degrade to substring matching; patterns also match as
    /// separator-aligned path components.
    pub fn admits(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        if path.as_os_str().is_empty() {
            return false;
        }

        let in_include = self.include.iter().any(|inc| {
            !inc.as_os_str().is_empty() && (path == *inc || path.starts_with(inc))
        });
        if !in_include {
            return false;
        }

        let path_str = path.to_string_lossy();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        for pattern in &self.exclude {
            match Glob::new(pattern) {
                Ok(glob) => {
                    if glob.compile_matcher().is_match(&basename) {
                        return false;
                    }
                }
                Err(_) => {
                    if path_str.contains(pattern.as_str()) {
                        return false;
                    }
                }
            }

            // separator-aligned component match anywhere in the path
            if path_str.starts_with(pattern.as_str())
                || path_str.contains(&format!("/{}/", pattern))
                || path_str.ends_with(&format!("/{}", pattern))
            {
                return false;
            }
        }

        true
    }
}

/// File-level admission: blacklist regexes with whitelist exceptions
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    blacklist: Vec<Regex>,
    whitelist: Vec<Regex>,
}

impl FileFilter {
    /// Compile the pattern lists; invalid regexes are logged and skipped
    pub fn new(blacklist: &[String], whitelist: &[String]) -> Self {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        debug!(pattern = %p, error = %e, "skipping invalid filter pattern");
                        None
                    }
                })
                .collect()
        };
        Self {
            blacklist: compile(blacklist),
            whitelist: compile(whitelist),
        }
    }

    /// Admit iff the path matches no blacklist pattern, or matches a
    /// whitelist pattern. An empty blacklist admits everything.
    pub fn admits(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();

        let blacklisted = self.blacklist.iter().any(|re| re.is_match(&path_str));
        if !blacklisted {
            return true;
        }
        self.whitelist.iter().any(|re| re.is_match(&path_str))
    }
}

/// The conjunction used by daemon admission:
/// `(dir_in_include ∧ ¬dir_excluded) ∧ (¬blacklist ∨ whitelist)`,
/// with the directory filter applied to the file's parent.
#[derive(Debug, Clone, Default)]
pub struct IngestFilter {
    pub directory: DirectoryFilter,
    pub file: FileFilter,
}

impl IngestFilter {
    pub fn new(
        include: &[String],
        exclude: &[String],
        blacklist: &[String],
        whitelist: &[String],
    ) -> Self {
        Self {
            directory: DirectoryFilter::new(include, exclude),
            file: FileFilter::new(blacklist, whitelist),
        }
    }

    pub fn admits(&self, path: &Path) -> bool {
        let parent = path.parent().unwrap_or(path);
        self.directory.admits(parent) && self.file.admits(path)
    }
}
