// tests/preview_scenarios.rs
//
// End-to-end behaviour of resolver + scanner + descriptor on real temp trees,
// plus route registration on a host router.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::json;
use tower::ServiceExt as _;

use live_frame_preview::registration::PREVIEW_EXTENSION;
use live_frame_preview::{
    preload, scan, AppState, ArtifactStatus, ExtensionFilter, HostApp, PreviewService,
    ProjectResolver,
};

fn frame(path: &Path, secs: u64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"frame").unwrap();
    let f = File::options().write(true).open(path).unwrap();
    f.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

fn service(root: &Path) -> PreviewService {
    PreviewService::new(
        ProjectResolver::new(Some(root.to_path_buf())),
        Arc::new(ExtensionFilter::default()),
    )
}

#[test]
fn scenario_a_newest_top_level_frame() {
    let root = tempfile::tempdir().unwrap();
    let proj = root.path().join("proj1");
    frame(&proj.join("a.png"), 10);
    frame(&proj.join("b.png"), 20);

    let got = scan(&proj, false, &ExtensionFilter::default()).expect("artifact");
    assert_eq!(got.path, proj.join("b.png"));
}

#[test]
fn scenario_b_loop_subdirectory() {
    let root = tempfile::tempdir().unwrap();
    let proj = root.path().join("proj1");
    frame(&proj.join("loopA").join("c.png"), 30);

    let filter = ExtensionFilter::default();
    let got = scan(&proj, true, &filter).expect("artifact");
    assert_eq!(got.path, proj.join("loopA").join("c.png"));
    assert!(scan(&proj, false, &filter).is_none());
}

#[test]
fn scenario_c_missing_identifier_never_touches_disk() {
    // A root that does not exist: the error must come from the record alone.
    let d = service(Path::new("/no/such/root")).query(&json!({}), 750, true);
    assert_eq!(d.error.as_deref(), Some("missing identifier"));
    assert_eq!(d.artifact, None);
}

#[test]
fn scenario_d_empty_project_directory() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("proj2")).unwrap();

    let d = service(root.path()).query(&json!({"id": "proj2"}), 750, true);
    assert!(d.exists);
    assert_eq!(d.artifact, Some(ArtifactStatus::NoArtifactYet));
}

#[test]
fn project_id_key_resolves_like_id() {
    let root = tempfile::tempdir().unwrap();
    frame(&root.path().join("proj1").join("a.png"), 10);
    let svc = service(root.path());

    let by_id = svc.query(&json!({"id": "proj1"}), 750, true);
    let by_project_id = svc.query(&json!({"project_id": "proj1"}), 750, true);
    assert_eq!(by_id, by_project_id);
}

#[test]
fn unchanged_directory_scans_identically() {
    let root = tempfile::tempdir().unwrap();
    let proj = root.path().join("p");
    frame(&proj.join("x.jpg"), 5);
    frame(&proj.join("l1").join("y.png"), 7);

    let filter = ExtensionFilter::default();
    assert_eq!(scan(&proj, true, &filter), scan(&proj, true, &filter));
}

#[test]
fn refresh_values_clamp() {
    let root = tempfile::tempdir().unwrap();
    let svc = service(root.path());
    let got: Vec<u32> = [0, 50, 100, 5000, 10_000, 50_000]
        .into_iter()
        .map(|ms| svc.query(&json!({"id": "p"}), ms, true).refresh_ms)
        .collect();
    assert_eq!(got, vec![100, 100, 100, 5000, 10_000, 10_000]);
}

#[tokio::test]
async fn preload_attaches_routes_next_to_host_routes() {
    let root = tempfile::tempdir().unwrap();
    frame(&root.path().join("proj1").join("a.png"), 10);

    let mut host = HostApp::new();
    host.mount(&["/host"], Router::new().route("/host", get(|| async { "host" })))
        .unwrap();
    assert!(preload(Some(&mut host), AppState::new(service(root.path()))));
    assert!(preload(Some(&mut host), AppState::new(service(root.path()))));
    assert!(host.is_mounted(PREVIEW_EXTENSION));

    let app = host.into_router();
    for uri in ["/host", "/preview/info?project_id=proj1", "/preview/image?project_id=proj1"] {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "GET {uri}");
    }
}
