// src/api.rs
//! HTTP surface for the polling UI.
//!
//! - GET  /health
//! - POST /preview/descriptor   {project_data, refresh_ms?, include_subdirs?}
//! - GET  /preview/info         ?project_id=..&subdirs=1
//! - GET  /preview/image        ?project_id=..&subdirs=1

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceExt as _;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::preview::{ArtifactInfo, ArtifactLookup, PreviewDescriptor, PreviewService};
use crate::resolver::{ProjectDirectory, ResolveError};
use crate::scanner::ArtifactReference;

/// Header carrying the artifact mtime in epoch milliseconds.
pub const HEADER_ARTIFACT_MTIME: &str = "x-artifact-mtime-ms";

#[derive(Clone)]
pub struct AppState {
    pub preview: PreviewService,
}

impl AppState {
    pub fn new(preview: PreviewService) -> Self {
        Self { preview }
    }
}

/// Preview routes only, ready to be merged into a host router.
pub fn preview_routes(state: AppState) -> Router {
    Router::new()
        .route("/preview/descriptor", post(descriptor))
        .route("/preview/info", get(live_info))
        .route("/preview/image", get(live_image))
        .with_state(state)
}

/// Standalone router: health + preview routes + permissive CORS for the UI.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(preview_routes(state))
        .layer(CorsLayer::very_permissive())
}

#[derive(Debug, Deserialize)]
struct DescriptorReq {
    #[serde(default)]
    project_data: Value,
    /// Kept loose so out-of-range or fractional values clamp instead of
    /// failing the whole request.
    #[serde(default)]
    refresh_ms: Option<Value>,
    #[serde(default)]
    include_subdirs: Option<bool>,
}

/// Interpret a caller's `refresh_ms`, saturating to `i64` before the clamp.
/// Anything that is not a number (or a numeric string) takes `default`.
fn refresh_hint(raw: Option<&Value>, default: u32) -> i64 {
    let fallback = i64::from(default);
    match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| n.as_f64().and_then(saturate))
            .unwrap_or(fallback),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(saturate))
                .unwrap_or(fallback)
        }
        _ => fallback,
    }
}

fn saturate(f: f64) -> Option<i64> {
    // `as` saturates at the i64 bounds
    (!f.is_nan()).then(|| f.round() as i64)
}

async fn descriptor(State(state): State<AppState>, Json(body): Json<DescriptorReq>) -> Response {
    let svc = state.preview.clone();
    let refresh_ms = refresh_hint(body.refresh_ms.as_ref(), svc.default_refresh_ms());
    let include_subdirs = body
        .include_subdirs
        .unwrap_or_else(|| svc.default_include_subdirs());

    let task = move || svc.query(&body.project_data, refresh_ms, include_subdirs);
    match tokio::task::spawn_blocking(task).await {
        Ok(d) => Json::<PreviewDescriptor>(d).into_response(),
        Err(e) => scan_failed(e),
    }
}

fn scan_failed(e: tokio::task::JoinError) -> Response {
    warn!(target: "preview", error = %e, "scan task failed");
    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "scan failed" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct LiveQuery {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    subdirs: Option<String>,
}

impl LiveQuery {
    fn record(&self) -> Value {
        match &self.project_id {
            Some(id) => json!({ "project_id": id }),
            None => json!({}),
        }
    }

    fn include_subdirs(&self, default: bool) -> bool {
        self.subdirs.as_deref().map_or(default, |v| parse_flag(v, default))
    }
}

/// `1/0`, `true/false`, `yes/no`, `on/off`; anything else keeps the default.
fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn identifier_error(err: &ResolveError) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn lookup(
    state: &AppState,
    q: &LiveQuery,
) -> Result<(ProjectDirectory, ArtifactLookup), Response> {
    let svc = state.preview.clone();
    let record = q.record();
    let include_subdirs = q.include_subdirs(svc.default_include_subdirs());

    match tokio::task::spawn_blocking(move || svc.latest(&record, include_subdirs)).await {
        Ok(Ok(found)) => Ok(found),
        Ok(Err(err)) => Err(identifier_error(&err)),
        Err(e) => Err(scan_failed(e)),
    }
}

async fn live_info(State(state): State<AppState>, Query(q): Query<LiveQuery>) -> Response {
    let (dir, found) = match lookup(&state, &q).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let info = ArtifactInfo::new(&dir, &found);
    let mut resp = Json(info).into_response();
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

async fn live_image(
    State(state): State<AppState>,
    Query(q): Query<LiveQuery>,
    req: Request,
) -> Response {
    let (dir, found) = match lookup(&state, &q).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(artifact) = found.artifact() else {
        debug!(target: "preview", project = %dir.identifier, "no artifact yet");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no artifact yet", "exists": dir.exists })),
        )
            .into_response();
    };
    serve_artifact(artifact, req).await
}

/// Stream the artifact bytes. `If-None-Match` is answered here against the
/// ETag; `If-Modified-Since` and ranges are left to `ServeFile`.
///
/// The file may be rewritten between the scan and the open, so the validator
/// is rebuilt from a fresh `stat`. When the file changes again while being
/// served, the response goes out without ETag or mtime and the next poll
/// picks up the new frame.
pub async fn serve_artifact(artifact: &ArtifactReference, req: Request) -> Response {
    let current = restat(artifact).await.unwrap_or_else(|| artifact.clone());
    let etag = current.etag();
    let mtime_ms = current.modified_since_epoch().as_millis().to_string();

    if etag_matches(req.headers(), &etag) {
        let mut resp = StatusCode::NOT_MODIFIED.into_response();
        decorate(resp.headers_mut(), &etag, &mtime_ms);
        return resp;
    }

    let mut resp = match ServeFile::new(&current.path).oneshot(req).await {
        Ok(r) => r.map(Body::new),
        Err(never) => match never {},
    };
    if !(resp.status().is_success() || resp.status() == StatusCode::NOT_MODIFIED) {
        return resp;
    }
    if restat(&current).await.as_ref() == Some(&current) {
        decorate(resp.headers_mut(), &etag, &mtime_ms);
    } else {
        let path = current.path.display();
        debug!(target: "preview", path = %path, "artifact changed while serving");
        resp.headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    resp
}

/// Current mtime and size of the artifact's path, if it is still a file.
async fn restat(artifact: &ArtifactReference) -> Option<ArtifactReference> {
    let meta = tokio::fs::symlink_metadata(&artifact.path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(ArtifactReference {
        path: artifact.path.clone(),
        modified: meta.modified().ok()?,
        size: meta.len(),
    })
}

fn decorate(headers: &mut HeaderMap, etag: &str, mtime_ms: &str) {
    if let Ok(v) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, v);
    }
    if let Ok(v) = HeaderValue::from_str(mtime_ms) {
        headers.insert(HEADER_ARTIFACT_MTIME, v);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().trim_start_matches("W/"))
        .any(|t| t == "*" || t == etag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_leniently() {
        assert!(parse_flag("1", false));
        assert!(parse_flag("TRUE", false));
        assert!(parse_flag(" on ", false));
        assert!(!parse_flag("0", true));
        assert!(!parse_flag("no", true));
        assert!(parse_flag("maybe", true));
        assert!(!parse_flag("maybe", false));
    }

    #[test]
    fn if_none_match_lists_and_weak_tags() {
        let mut h = HeaderMap::new();
        h.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"aaa\", W/\"bbb\""));
        assert!(etag_matches(&h, "\"bbb\""));
        assert!(etag_matches(&h, "\"aaa\""));
        assert!(!etag_matches(&h, "\"ccc\""));
        assert!(!etag_matches(&HeaderMap::new(), "\"aaa\""));
    }

    #[test]
    fn refresh_hint_saturates_and_defaults() {
        let hint = |v: Value| refresh_hint(Some(&v), 750);
        assert_eq!(hint(json!(50)), 50);
        assert_eq!(hint(json!(750.0)), 750);
        assert_eq!(hint(json!(1e20)), i64::MAX);
        assert_eq!(hint(json!(-1e30)), i64::MIN);
        assert_eq!(hint(json!(u64::MAX)), i64::MAX);
        assert_eq!(hint(json!("250")), 250);
        assert_eq!(hint(json!("fast")), 750);
        assert_eq!(hint(json!(true)), 750);
        assert_eq!(hint(Value::Null), 750);
        assert_eq!(refresh_hint(None, 400), 400);
    }

    #[tokio::test]
    async fn stale_snapshot_is_served_with_fresh_validator() {
        use std::time::{Duration, UNIX_EPOCH};

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.png");
        std::fs::write(&path, b"rewritten").unwrap();
        let f = std::fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(UNIX_EPOCH + Duration::from_secs(20)).unwrap();

        // what the scan saw before the pipeline overwrote the file
        let stale = ArtifactReference {
            path: path.clone(),
            modified: UNIX_EPOCH + Duration::from_secs(10),
            size: 3,
        };
        let fresh = ArtifactReference {
            path: path.clone(),
            modified: UNIX_EPOCH + Duration::from_secs(20),
            size: b"rewritten".len() as u64,
        };

        let req = axum::http::Request::builder()
            .uri("/preview/image")
            .header(header::IF_NONE_MATCH, stale.etag())
            .body(Body::empty())
            .unwrap();
        let resp = serve_artifact(&stale, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::ETAG).unwrap(), fresh.etag().as_str());
        assert_eq!(resp.headers().get(HEADER_ARTIFACT_MTIME).unwrap(), "20000");

        let req = axum::http::Request::builder()
            .uri("/preview/image")
            .header(header::IF_NONE_MATCH, fresh.etag())
            .body(Body::empty())
            .unwrap();
        let resp = serve_artifact(&stale, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    }
}
