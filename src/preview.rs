// src/preview.rs
//! Preview query: turns a project record + UI hints into the descriptor the
//! polling UI consumes, and into artifact lookups for the serving routes.
//!
//! Every path through here ends in a value. Identifier problems become an
//! `error` field, filesystem trouble becomes `exists = false` or
//! `NoArtifactYet`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{clamp_refresh_ms, PreviewConfig, DEFAULT_REFRESH_MS};
use crate::resolver::{ProjectDirectory, ProjectResolver, ResolveError};
use crate::scanner::{self, ArtifactFilter, ArtifactReference, ExtensionFilter};

/// Outcome of looking for the newest frame of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLookup {
    Found(ArtifactReference),
    NoArtifactYet,
}

impl ArtifactLookup {
    pub fn artifact(&self) -> Option<&ArtifactReference> {
        match self {
            ArtifactLookup::Found(a) => Some(a),
            ArtifactLookup::NoArtifactYet => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    ArtifactFound,
    NoArtifactYet,
}

/// Snapshot handed to the UI on every descriptor query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub refresh_ms: u32,
    pub include_subdirs: bool,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreviewDescriptor {
    fn failed(err: &ResolveError, refresh_ms: u32, include_subdirs: bool) -> Self {
        Self {
            project_id: None,
            refresh_ms,
            include_subdirs,
            exists: false,
            artifact: None,
            error: Some(err.to_string()),
        }
    }

    /// Host node-graph form: flat keys, each value wrapped in a one-element
    /// list. An error replaces every other key.
    pub fn ui_state(&self) -> BTreeMap<&'static str, Vec<Value>> {
        let mut ui = BTreeMap::new();
        if let Some(err) = &self.error {
            ui.insert("live_preview_error", vec![json!(err)]);
            return ui;
        }
        ui.insert("live_preview_project_id", vec![json!(self.project_id)]);
        ui.insert("live_preview_refresh_ms", vec![json!(self.refresh_ms)]);
        ui.insert("live_preview_include_subdirs", vec![json!(self.include_subdirs)]);
        ui.insert("live_preview_exists", vec![json!(self.exists)]);
        ui
    }
}

/// JSON body of the info route: enough for the UI to decide whether the
/// frame changed before fetching bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub project_id: String,
    pub exists: bool,
    pub has_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_dir: Option<String>,
    /// Seconds since the epoch, fractional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ArtifactInfo {
    pub fn new(dir: &ProjectDirectory, lookup: &ArtifactLookup) -> Self {
        let mut info = Self {
            project_id: dir.identifier.to_string(),
            exists: dir.exists,
            has_image: false,
            filename: None,
            loop_dir: None,
            mtime: None,
            mtime_ms: None,
            modified_at: None,
            size: None,
            etag: None,
        };
        if let ArtifactLookup::Found(a) = lookup {
            let since = a.modified_since_epoch();
            info.has_image = true;
            info.filename = a.file_name().map(str::to_string);
            info.loop_dir = dir.path.as_deref().and_then(|p| a.loop_dir(p));
            info.mtime = Some(since.as_secs_f64());
            info.mtime_ms = Some(since.as_millis() as u64);
            info.modified_at = Some(DateTime::<Utc>::from(a.modified));
            info.size = Some(a.size);
            info.etag = Some(a.etag());
        }
        info
    }
}

/// Resolver + scanner bundle shared by all requests. Stateless apart from
/// configuration; safe to clone into handlers.
#[derive(Clone)]
pub struct PreviewService {
    resolver: ProjectResolver,
    filter: Arc<dyn ArtifactFilter>,
    default_refresh_ms: u32,
    default_include_subdirs: bool,
}

impl PreviewService {
    pub fn new(resolver: ProjectResolver, filter: Arc<dyn ArtifactFilter>) -> Self {
        Self {
            resolver,
            filter,
            default_refresh_ms: DEFAULT_REFRESH_MS,
            default_include_subdirs: true,
        }
    }

    /// Service bound to the process-wide root, with the configured filter
    /// and UI defaults.
    pub fn from_config(cfg: &PreviewConfig) -> Self {
        let mut svc = Self::new(
            ProjectResolver::from_installed_root(),
            Arc::new(ExtensionFilter::new(cfg.extensions.iter().cloned())),
        );
        svc.default_refresh_ms = clamp_refresh_ms(i64::from(cfg.default_refresh_ms));
        svc.default_include_subdirs = cfg.include_subdirs;
        svc
    }

    pub fn resolver(&self) -> &ProjectResolver {
        &self.resolver
    }

    pub fn default_refresh_ms(&self) -> u32 {
        self.default_refresh_ms
    }

    pub fn default_include_subdirs(&self) -> bool {
        self.default_include_subdirs
    }

    /// Build the UI descriptor. Missing identifiers stop before any
    /// filesystem access.
    pub fn query(
        &self,
        project_data: &Value,
        refresh_ms: i64,
        include_subdirs: bool,
    ) -> PreviewDescriptor {
        let refresh_ms = clamp_refresh_ms(refresh_ms);
        let dir = match self.resolver.resolve(project_data) {
            Ok(dir) => dir,
            Err(err) => {
                counter!("preview_identifier_errors_total").increment(1);
                debug!(target: "preview", error = %err, "descriptor query rejected");
                return PreviewDescriptor::failed(&err, refresh_ms, include_subdirs);
            }
        };

        let lookup = self.scan_dir(&dir, include_subdirs);
        PreviewDescriptor {
            project_id: Some(dir.identifier.to_string()),
            refresh_ms,
            include_subdirs,
            exists: dir.exists,
            artifact: Some(match lookup {
                ArtifactLookup::Found(_) => ArtifactStatus::ArtifactFound,
                ArtifactLookup::NoArtifactYet => ArtifactStatus::NoArtifactYet,
            }),
            error: None,
        }
    }

    /// Resolve and scan in one go, for the info/image routes.
    pub fn latest(
        &self,
        project_data: &Value,
        include_subdirs: bool,
    ) -> Result<(ProjectDirectory, ArtifactLookup), ResolveError> {
        let dir = self.resolver.resolve(project_data).inspect_err(|_| {
            counter!("preview_identifier_errors_total").increment(1);
        })?;
        let lookup = self.scan_dir(&dir, include_subdirs);
        Ok((dir, lookup))
    }

    fn scan_dir(&self, dir: &ProjectDirectory, include_subdirs: bool) -> ArtifactLookup {
        let Some(path) = dir.path.as_deref().filter(|_| dir.exists) else {
            counter!("preview_artifact_missing_total").increment(1);
            return ArtifactLookup::NoArtifactYet;
        };
        self.scan_path(path, include_subdirs)
    }

    fn scan_path(&self, path: &Path, include_subdirs: bool) -> ArtifactLookup {
        let started = Instant::now();
        let found = scanner::scan(path, include_subdirs, self.filter.as_ref());
        histogram!("preview_scan_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        counter!("preview_scans_total").increment(1);

        match found {
            Some(a) => {
                counter!("preview_artifact_found_total").increment(1);
                ArtifactLookup::Found(a)
            }
            None => {
                counter!("preview_artifact_missing_total").increment(1);
                ArtifactLookup::NoArtifactYet
            }
        }
    }
}
