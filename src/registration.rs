// src/registration.rs
//! Host-driven route registration.
//!
//! Hosts attach the preview routes at startup in one of two ways: by handing
//! over their own [`HostApp`], or by calling [`preload`] with nothing and
//! letting it find the process-wide host via [`HostApp::global`]. Both go
//! through [`setup_routes`], which is idempotent.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use axum::Router;
use once_cell::sync::Lazy;
use tracing::{error, info};

use crate::api::{preview_routes, AppState};

/// Name under which the preview routes are mounted on a host.
pub const PREVIEW_EXTENSION: &str = "live-preview";

/// Routes owned by the preview extension. A host that already serves one of
/// these from somewhere else cannot take the extension.
pub const PREVIEW_PATHS: [&str; 3] = ["/preview/descriptor", "/preview/info", "/preview/image"];

static GLOBAL_HOST: Lazy<Mutex<HostApp>> = Lazy::new(|| Mutex::new(HostApp::new()));

/// A host application's routing object plus the bookkeeping needed to make
/// registration idempotent.
#[derive(Debug, Default)]
pub struct HostApp {
    router: Router,
    mounted: BTreeSet<&'static str>,
    claimed_paths: BTreeSet<String>,
}

impl HostApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Well-known process-wide host, for hosts that call [`preload`] with no
    /// arguments.
    pub fn global() -> &'static Mutex<HostApp> {
        &GLOBAL_HOST
    }

    /// Add a host-owned route set. `paths` lists what it serves so later
    /// extensions can detect collisions by name.
    ///
    /// `paths` need not be exhaustive: an overlap it misses is still caught
    /// when the routers are merged, and the host is left as it was.
    pub fn mount(&mut self, paths: &[&str], routes: Router) -> Result<()> {
        if let Some(p) = paths.iter().find(|p| self.claimed_paths.contains(**p)) {
            bail!("route {p} is already registered on this host");
        }
        // axum panics on overlapping routes instead of returning an error
        let current = self.router.clone();
        let merged = panic::catch_unwind(AssertUnwindSafe(move || current.merge(routes)))
            .map_err(|_| anyhow!("routes overlap with ones already on this host"))?;
        self.router = merged;
        self.claimed_paths.extend(paths.iter().map(|p| p.to_string()));
        Ok(())
    }

    pub fn is_mounted(&self, extension: &str) -> bool {
        self.mounted.contains(extension)
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Attach the preview routes to `host`. Calling it again on the same host is
/// a no-op.
pub fn setup_routes(host: &mut HostApp, state: AppState) -> Result<()> {
    if host.is_mounted(PREVIEW_EXTENSION) {
        info!(target: "registration", "preview routes already registered");
        return Ok(());
    }
    host.mount(&PREVIEW_PATHS, preview_routes(state))?;
    host.mounted.insert(PREVIEW_EXTENSION);
    info!(target: "registration", paths = ?PREVIEW_PATHS, "preview routes registered");
    Ok(())
}

/// Startup entry point. Uses `host` when given, otherwise the global host.
///
/// This is the one place failures are logged loudly and swallowed: a host
/// that cannot take the routes should still finish starting up.
pub fn preload(host: Option<&mut HostApp>, state: AppState) -> bool {
    let outcome = match host {
        Some(h) => setup_routes(h, state),
        None => HostApp::global()
            .lock()
            .map_err(|_| anyhow!("global host lock poisoned"))
            .and_then(|mut h| setup_routes(&mut h, state)),
    };
    match outcome {
        Ok(()) => true,
        Err(e) => {
            error!(target: "registration", error = %e, "failed to register preview routes");
            false
        }
    }
}
