//! Prometheus metrics for the gateway.
//!
//! Counters are recorded unconditionally; they are only exported when the
//! Prometheus listener has been installed via [`init_metrics`].

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "comfig_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "comfig_cache_misses_total";
    pub const UPSTREAM_FETCHES_TOTAL: &str = "comfig_upstream_fetches_total";
    pub const UPSTREAM_BATCH_FAILURES_TOTAL: &str = "comfig_upstream_batch_failures_total";
    pub const DOWNLOADS_TOTAL: &str = "comfig_downloads_total";
    pub const REFRESHES_TOTAL: &str = "comfig_refreshes_total";
}

/// Install the Prometheus exporter listening on `listen`.
///
/// Must be called from within a tokio runtime. Returns `false` if the
/// exporter was already installed or could not be started.
pub fn init_metrics(listen: SocketAddr) -> bool {
    if INSTALLED.get().is_some() {
        tracing::debug!("Prometheus exporter already installed");
        return false;
    }

    match PrometheusBuilder::new().with_http_listener(listen).install() {
        Ok(()) => {
            let _ = INSTALLED.set(());
            tracing::info!(%listen, "Prometheus exporter listening");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus exporter");
            false
        }
    }
}

pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_miss(tier: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "tier" => tier).increment(1);
}

/// `outcome` is one of `ok`, `status`, `error`.
pub fn record_upstream_fetch(resource: &'static str, outcome: &'static str) {
    counter!(
        names::UPSTREAM_FETCHES_TOTAL,
        "resource" => resource,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_batch_failure() {
    counter!(names::UPSTREAM_BATCH_FAILURES_TOTAL).increment(1);
}

pub fn record_download(kind: &'static str, status: u16) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    counter!(names::DOWNLOADS_TOTAL, "kind" => kind, "status_class" => status_class).increment(1);
}

/// `trigger` is `webhook` or `schedule`.
pub fn record_refresh(trigger: &'static str) {
    counter!(names::REFRESHES_TOTAL, "trigger" => trigger).increment(1);
}
