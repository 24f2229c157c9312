// src/resolver.rs
//! Project directory resolution: project record → `root/<id>` + existence.
//!
//! The root is process-wide and installed once at startup. Resolution never
//! creates anything on disk; it is path arithmetic plus one `is_dir` check.

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Record keys recognized as the project identifier, in priority order.
pub const IDENTIFIER_KEYS: [&str; 2] = ["id", "project_id"];

static PROJECT_ROOT: OnceCell<PathBuf> = OnceCell::new();

/// Install the process-wide project root. Only the first call wins;
/// later calls return `false` and leave the root untouched.
pub fn install_root(root: PathBuf) -> bool {
    PROJECT_ROOT.set(root).is_ok()
}

/// The installed project root, if startup provided one.
pub fn installed_root() -> Option<&'static Path> {
    PROJECT_ROOT.get().map(PathBuf::as_path)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("missing identifier")]
    MissingIdentifier,
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Opaque, non-empty project token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentifier(String);

impl ProjectIdentifier {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let s = raw.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the identifier out of a loosely typed project record.
///
/// Tries `id` first, then `project_id`. Strings must be non-empty; integers
/// are accepted and rendered in decimal. A bare string record is taken as the
/// identifier itself.
pub fn extract_project_id(record: &Value) -> Option<ProjectIdentifier> {
    match record {
        Value::Object(map) => IDENTIFIER_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(identifier_from_value),
        Value::String(_) => identifier_from_value(record),
        _ => None,
    }
}

fn identifier_from_value(v: &Value) -> Option<ProjectIdentifier> {
    match v {
        Value::String(s) => ProjectIdentifier::new(s.as_str()),
        Value::Number(n) if n.is_i64() || n.is_u64() => ProjectIdentifier::new(n.to_string()),
        _ => None,
    }
}

/// A project's output directory as seen at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDirectory {
    pub identifier: ProjectIdentifier,
    /// `None` when no root is configured.
    pub path: Option<PathBuf>,
    pub exists: bool,
}

/// Maps identifiers to directories under one root.
#[derive(Debug, Clone, Default)]
pub struct ProjectResolver {
    root: Option<PathBuf>,
}

impl ProjectResolver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Resolver bound to the process-wide root (see [`install_root`]).
    pub fn from_installed_root() -> Self {
        Self::new(installed_root().map(Path::to_path_buf))
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Resolve a project record. Only identifier problems are errors; a
    /// missing root or directory comes back as `exists = false`.
    pub fn resolve(&self, record: &Value) -> Result<ProjectDirectory, ResolveError> {
        let identifier = extract_project_id(record).ok_or(ResolveError::MissingIdentifier)?;
        self.resolve_id(identifier)
    }

    pub fn resolve_id(
        &self,
        identifier: ProjectIdentifier,
    ) -> Result<ProjectDirectory, ResolveError> {
        validate_identifier(&identifier)?;

        let Some(root) = self.root.as_deref() else {
            return Ok(ProjectDirectory {
                identifier,
                path: None,
                exists: false,
            });
        };

        let path = root.join(identifier.as_str());
        let exists = path.is_dir();
        if exists && !stays_beneath(root, &path) {
            return Err(ResolveError::InvalidIdentifier(identifier.0));
        }

        Ok(ProjectDirectory {
            identifier,
            path: Some(path),
            exists,
        })
    }
}

/// One plain path segment only: no separators, no `.`/`..`, no prefixes.
fn validate_identifier(id: &ProjectIdentifier) -> Result<(), ResolveError> {
    let raw = id.as_str();
    let invalid = || ResolveError::InvalidIdentifier(raw.to_string());

    if raw.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(raw).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Symlinked project directories must still land under the root.
fn stays_beneath(root: &Path, candidate: &Path) -> bool {
    match (root.canonicalize(), candidate.canonicalize()) {
        (Ok(root), Ok(candidate)) => candidate.starts_with(&root) && candidate != root,
        _ => false,
    }
}
