// src/scanner.rs
//! Latest-artifact scanner.
//!
//! One read-only pass over a project directory (and, optionally, its
//! immediate subdirectories) picking the newest eligible file. Nothing is
//! cached; every call reads the filesystem again.
//!
//! Failure policy: unreadable entries are skipped, an unreadable directory
//! yields `None`. Nothing here returns an error.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Decides which files count as candidate frames.
pub trait ArtifactFilter: Send + Sync {
    fn accepts(&self, path: &Path) -> bool;
}

/// Accepts files whose extension is in a configured set (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    /// `patterns` may be `png`, `.png` or `*.png`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let extensions =
            crate::config::clean_extensions(patterns.into_iter().map(Into::into).collect());
        Self { extensions }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EXTENSIONS.iter().copied())
    }
}

impl ArtifactFilter for ExtensionFilter {
    fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Snapshot of the newest file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl ArtifactReference {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Name of the immediate subdirectory of `project_dir` holding the file,
    /// or `None` for top-level files.
    pub fn loop_dir(&self, project_dir: &Path) -> Option<String> {
        let parent = self.path.parent()?;
        if parent == project_dir {
            return None;
        }
        parent
            .strip_prefix(project_dir)
            .ok()
            .map(|rel| rel.to_string_lossy().into_owned())
    }

    pub fn modified_since_epoch(&self) -> Duration {
        self.modified.duration_since(UNIX_EPOCH).unwrap_or_default()
    }

    /// Strong validator for conditional fetches: changes whenever the path,
    /// mtime or size changes.
    pub fn etag(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(self.modified_since_epoch().as_nanos().to_le_bytes());
        hasher.update(self.size.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(34);
        out.push('"');
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out.push('"');
        out
    }

    /// Total order used for "most recent": mtime first, then the whole path
    /// compared as a string (`a/x.png` sorts after `a.png`).
    fn recency_cmp(&self, other: &Self) -> Ordering {
        self.modified.cmp(&other.modified).then_with(|| {
            let ours = self.path.as_os_str().as_encoded_bytes();
            ours.cmp(other.path.as_os_str().as_encoded_bytes())
        })
    }
}

/// Find the newest eligible file in `dir`, plus one level of children when
/// `include_subdirs` is set. Returns `None` if the directory is missing,
/// unreadable, or holds nothing eligible.
pub fn scan(
    dir: &Path,
    include_subdirs: bool,
    filter: &dyn ArtifactFilter,
) -> Option<ArtifactReference> {
    let entries = fs::read_dir(dir).ok()?;

    let mut best: Option<ArtifactReference> = None;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            if include_subdirs && !is_hidden(&path) {
                subdirs.push(path);
            }
            continue;
        }
        consider(&mut best, candidate(path, &meta, filter));
    }

    for sub in subdirs {
        let Ok(entries) = fs::read_dir(&sub) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                continue;
            }
            consider(&mut best, candidate(path, &meta, filter));
        }
    }

    best
}

fn candidate(
    path: PathBuf,
    meta: &fs::Metadata,
    filter: &dyn ArtifactFilter,
) -> Option<ArtifactReference> {
    // symlinks could point outside the project tree
    if !meta.is_file() || is_hidden(&path) || !filter.accepts(&path) {
        return None;
    }
    let modified = meta.modified().ok()?;
    Some(ArtifactReference {
        path,
        modified,
        size: meta.len(),
    })
}

fn consider(best: &mut Option<ArtifactReference>, next: Option<ArtifactReference>) {
    let Some(next) = next else {
        return;
    };
    match best {
        Some(cur) if cur.recency_cmp(&next) != Ordering::Less => {}
        _ => *best = Some(next),
    }
}

/// Dot-files are in-progress writes or tooling droppings.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
