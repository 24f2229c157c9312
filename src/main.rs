//! Live Frame Preview: binary entrypoint.
//! Loads config, installs the project root, registers the preview routes on
//! the host router and serves it.

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use live_frame_preview::config::PreviewConfig;
use live_frame_preview::metrics::Metrics;
use live_frame_preview::resolver::install_root;
use live_frame_preview::{preload, AppState, HostApp, PreviewService};

/// Compact logs by default, JSON when PREVIEW_LOG_JSON=1.
/// Filter comes from RUST_LOG, falling back to this crate at info.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("live_frame_preview=info,preview=info,registration=info,warn")
    });

    let json = std::env::var("PREVIEW_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = PreviewConfig::load_default()?;
    match cfg.root_dir.clone() {
        Some(root) => {
            if !root.is_dir() {
                warn!(
                    root = %root.display(),
                    "project root does not exist yet; previews report exists=false"
                );
            }
            install_root(root);
        }
        None => warn!("no project root configured; set PREVIEW_ROOT_DIR"),
    }

    let metrics = Metrics::init()?;

    let mut host = HostApp::new();
    host.mount(&["/health"], Router::new().route("/health", get(|| async { "OK" })))?;
    host.mount(&["/metrics"], metrics.router())?;

    let state = AppState::new(PreviewService::from_config(&cfg));
    preload(Some(&mut host), state);

    let app = host.into_router().layer(CorsLayer::very_permissive());

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr.as_str())
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, extensions = ?cfg.extensions, "live preview listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
