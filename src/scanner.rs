//! Directory walking: turns a tree into an ordered list of upload candidates.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, UploadError};
use crate::helpers::is_denied_extension;

/// Decides whether a scanned entry (and, for directories, its subtree) is skipped
pub trait IgnorePredicate: Send + Sync {
    fn is_ignored(&self, path: &Path, root: &Path) -> bool;
}

impl<F> IgnorePredicate for F
where
    F: Fn(&Path, &Path) -> bool + Send + Sync,
{
    fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        self(path, root)
    }
}

/// Predicate that keeps everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIgnore;

impl IgnorePredicate for NoIgnore {
    fn is_ignored(&self, _path: &Path, _root: &Path) -> bool {
        false
    }
}

/// Glob-based ignore rules.
///
/// A pattern matches when it matches either the root-relative path (forward
/// slashes) or the bare file name, so `*.tmp` hits `.tmp` files at any depth
/// and `node_modules` prunes that directory wherever it appears.
#[derive(Debug, Clone)]
pub struct GlobIgnore {
    set: GlobSet,
}

impl GlobIgnore {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pattern.trim_end_matches('/'))
                .build()
                .map_err(|e| {
                    UploadError::Config(format!("Failed to compile glob '{}': {}", pattern, e))
                })?;
            builder.add(glob);
        }

        let set = builder
            .build()
            .map_err(|e| UploadError::Config(format!("Failed to build globset: {}", e)))?;
        Ok(Self { set })
    }
}

impl IgnorePredicate for GlobIgnore {
    fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let relative = path
            .strip_prefix(root)
            .map(normalize_relative)
            .unwrap_or_default();
        if !relative.is_empty() && self.set.is_match(&relative) {
            return true;
        }
        path.file_name()
            .map(|name| self.set.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

/// Terminal state of a candidate's transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Success,
    Failed,
}

/// One discovered file
#[derive(Debug, Clone)]
pub struct TransferCandidate {
    pub path: PathBuf,
    /// Path relative to the scan root, always with `/` separators
    pub relative_path: String,
    pub size: u64,
    status: TransferStatus,
    error: Option<String>,
}

impl TransferCandidate {
    pub fn new(path: PathBuf, relative_path: String, size: u64) -> Self {
        Self {
            path,
            relative_path,
            size,
            status: TransferStatus::Pending,
            error: None,
        }
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Directory part of the relative path, empty for files at the root
    pub fn relative_dir(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[..idx],
            None => "",
        }
    }

    pub fn file_name(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[idx + 1..],
            None => &self.relative_path,
        }
    }

    /// Record the transfer outcome. Only the first call has any effect;
    /// returns false if the status was already terminal.
    pub fn finish(&mut self, outcome: std::result::Result<(), String>) -> bool {
        if self.status != TransferStatus::Pending {
            return false;
        }
        match outcome {
            Ok(()) => self.status = TransferStatus::Success,
            Err(message) => {
                self.status = TransferStatus::Failed;
                self.error = Some(message);
            }
        }
        true
    }
}

/// Output of a directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub candidates: Vec<TransferCandidate>,
    pub total_bytes: u64,
}

/// Walk `root` depth-first (entries sorted by name) and collect upload candidates.
///
/// Entries matched by `ignore` are skipped together with their subtree.
/// Files with a denied extension are skipped with a warning. Walk errors are
/// fatal for the whole scan.
pub fn scan(
    root: &Path,
    ignore: &dyn IgnorePredicate,
    denied_extensions: &[String],
) -> Result<ScanResult> {
    if !root.is_dir() {
        return Err(UploadError::Scan {
            path: root.display().to_string(),
            message: "Path is not a directory".to_string(),
        });
    }

    let mut result = ScanResult::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let ignored = ignore.is_ignored(entry.path(), root);
            if ignored {
                debug!("Ignoring {}", entry.path().display());
            }
            !ignored
        });

    for entry in walker {
        let entry = entry.map_err(|e| UploadError::Scan {
            path: e
                .path()
                .unwrap_or(root)
                .display()
                .to_string(),
            message: e.to_string(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if is_denied_extension(path, denied_extensions) {
            warn!("Skipping disallowed file type: {}", path.display());
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| UploadError::Scan {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .len();

        let relative = path
            .strip_prefix(root)
            .map(normalize_relative)
            .map_err(|e| UploadError::Scan {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        result.total_bytes += size;
        result
            .candidates
            .push(TransferCandidate::new(path.to_path_buf(), relative, size));
    }

    debug!(
        "Scanned {}: {} files, {} bytes",
        root.display(),
        result.candidates.len(),
        result.total_bytes
    );
    Ok(result)
}

/// Render a relative path with `/` separators regardless of platform
pub fn normalize_relative(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
