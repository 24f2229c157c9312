// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the preview series so they
    /// show up on `/metrics` before the first poll.
    pub fn init() -> Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("preview_scans_total", "Directory scans performed.");
        describe_counter!(
            "preview_artifact_found_total",
            "Lookups that found an artifact."
        );
        describe_counter!(
            "preview_artifact_missing_total",
            "Lookups with no artifact or no project directory yet."
        );
        describe_counter!(
            "preview_identifier_errors_total",
            "Queries rejected for a missing or invalid project identifier."
        );
        describe_histogram!("preview_scan_ms", "Scan time in milliseconds.");

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
