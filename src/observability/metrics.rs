use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ---------------------------------------------------------------------------
// Metrics catalog
// ---------------------------------------------------------------------------

/// Register all metric descriptors at startup.
///
/// Call once after the recorder is installed, before any metrics are recorded.
pub fn describe_all_metrics() {
    // -- Downloads --
    describe_counter!(
        "mediadrop_downloads_total",
        "Download requests by format and result"
    );
    describe_histogram!(
        "mediadrop_download_duration_seconds",
        "Time from request to published file, including extraction"
    );
    describe_counter!(
        "mediadrop_published_bytes_total",
        "Total bytes moved into the publish store"
    );

    // -- Serving --
    describe_counter!(
        "mediadrop_serve_requests_total",
        "File download requests by result"
    );
    describe_counter!(
        "mediadrop_served_bytes_total",
        "Total bytes streamed to clients (file sizes at open time)"
    );

    // -- Retention --
    describe_counter!("mediadrop_retention_passes_total", "Completed retention passes");
    describe_counter!(
        "mediadrop_retention_files_deleted_total",
        "Files removed by the retention reaper"
    );
    describe_counter!(
        "mediadrop_retention_delete_failures_total",
        "Expired files the reaper failed to delete"
    );

    // -- System --
    describe_gauge!("mediadrop_uptime_seconds", "Process uptime");
    describe_counter!(
        "mediadrop_panic_total",
        "Total panics caught (should always be 0)"
    );
    describe_gauge!(
        "mediadrop_shutdown_in_progress",
        "1 if graceful shutdown is in progress, 0 otherwise"
    );
}

// ---------------------------------------------------------------------------
// Metric recording helpers
// ---------------------------------------------------------------------------

// -- Downloads --

pub fn inc_download(format: &str, result: &str) {
    counter!("mediadrop_downloads_total", "format" => format.to_string(), "result" => result.to_string()).increment(1);
}

pub fn record_download_duration(format: &str, seconds: f64) {
    histogram!("mediadrop_download_duration_seconds", "format" => format.to_string())
        .record(seconds);
}

pub fn add_published_bytes(bytes: u64) {
    counter!("mediadrop_published_bytes_total").increment(bytes);
}

// -- Serving --

pub fn inc_serve_request(result: &str) {
    counter!("mediadrop_serve_requests_total", "result" => result.to_string()).increment(1);
}

pub fn add_served_bytes(bytes: u64) {
    counter!("mediadrop_served_bytes_total").increment(bytes);
}

// -- Retention --

pub fn inc_retention_pass() {
    counter!("mediadrop_retention_passes_total").increment(1);
}

pub fn add_retention_files_deleted(count: u64) {
    counter!("mediadrop_retention_files_deleted_total").increment(count);
}

pub fn inc_retention_delete_failure() {
    counter!("mediadrop_retention_delete_failures_total").increment(1);
}

// -- System --

pub fn set_uptime_seconds(seconds: f64) {
    gauge!("mediadrop_uptime_seconds").set(seconds);
}

pub fn inc_panic_total() {
    counter!("mediadrop_panic_total").increment(1);
}

pub fn set_shutdown_in_progress(in_progress: bool) {
    gauge!("mediadrop_shutdown_in_progress").set(if in_progress { 1.0 } else { 0.0 });
}

// ---------------------------------------------------------------------------
// Uptime tracking task
// ---------------------------------------------------------------------------

/// Update the uptime gauge every second until cancelled.
pub async fn run_uptime_task(start_time: Instant, cancel: tokio_util::sync::CancellationToken) {
    let interval = std::time::Duration::from_secs(1);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {
                set_uptime_seconds(start_time.elapsed().as_secs_f64());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prometheus recorder installation
// ---------------------------------------------------------------------------

/// Install the global Prometheus recorder.
///
/// Returns a handle that renders the text exposition format for `/metrics`.
/// Fails if another recorder is already installed.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))
}
