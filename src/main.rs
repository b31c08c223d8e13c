use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mediadrop::core::config::AppConfig;
use mediadrop::core::shutdown::{ShutdownCoordinator, HTTP_DRAIN_TIMEOUT_SECS, SHUTDOWN_TIMEOUT_SECS};
use mediadrop::delivery::router::{self, AppState};
use mediadrop::download::DownloadContext;
use mediadrop::extract::{MediaExtractor, YtDlpExtractor};
use mediadrop::observability::metrics as obs_metrics;
use mediadrop::storage::retention;
use mediadrop::storage::PublishStore;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration (layered: default.toml → {env}.toml → env vars)
    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Metrics recorder must be installed before anything records.
    let metrics_handle = if config.observability.metrics_enabled {
        match obs_metrics::install_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("{e:#}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        // Detached recorder: /metrics renders an empty page.
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    };

    // Log panics with a backtrace and count them.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        obs_metrics::inc_panic_total();
        let backtrace = std::backtrace::Backtrace::force_capture();
        eprintln!("PANIC: {info}\nBacktrace:\n{backtrace}");
        default_hook(info);
    }));

    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "mediadrop starting");
    obs_metrics::describe_all_metrics();

    let store = PublishStore::new(config.storage.directory.clone());
    if let Err(e) = store.ensure_dir().await {
        error!(
            directory = %config.storage.directory.display(),
            error = %e,
            "failed to create storage directory"
        );
        return ExitCode::FAILURE;
    }

    let extractor: Arc<dyn MediaExtractor> =
        Arc::new(YtDlpExtractor::new(config.extractor.binary.clone()));
    match extractor.probe().await {
        Ok(version) => info!(binary = %config.extractor.binary, %version, "extractor available"),
        Err(e) => warn!(
            binary = %config.extractor.binary,
            error = %e,
            "extractor not available, downloads will fail until it is installed"
        ),
    }

    let shutdown = ShutdownCoordinator::new();

    // Retention reaper
    let retention_handle = tokio::spawn(retention::run_retention_task(
        store.clone(),
        config.retention.clone(),
        shutdown.token(),
    ));

    // Uptime gauge
    let start_time = std::time::Instant::now();
    tokio::spawn(obs_metrics::run_uptime_task(start_time, shutdown.token()));

    let app_state = AppState {
        downloads: DownloadContext::from_config(&config, store.clone(), extractor),
        config: config.clone(),
        start_time,
        metrics_handle,
    };
    let app = router::build_router(app_state);

    let http_addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(host = %config.server.host, port = config.server.port, error = %e, "invalid HTTP bind address");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%http_addr, error = %e, "failed to bind HTTP listener");
            return ExitCode::FAILURE;
        }
    };

    info!(
        %http_addr,
        store = %store.root().display(),
        public_base_url = %config.server.public_base_url,
        retention_interval_secs = config.retention.interval_secs,
        retention_max_age_secs = config.retention.max_age_secs,
        "HTTP server listening"
    );

    let shutdown_token = shutdown.token();
    let server_handle: JoinHandle<()> = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server error");
        }
    });

    shutdown.wait_for_signal_and_shutdown().await;

    obs_metrics::set_shutdown_in_progress(true);
    info!("initiating graceful shutdown sequence");
    let shutdown_result = tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        graceful_shutdown(server_handle, retention_handle),
    )
    .await;

    match shutdown_result {
        Ok(()) => {
            info!("graceful shutdown completed");
            ExitCode::SUCCESS
        }
        Err(_) => {
            error!(
                "shutdown timed out after {}s, forcing exit",
                SHUTDOWN_TIMEOUT_SECS
            );
            ExitCode::FAILURE
        }
    }
}

/// Wait for the reaper and the HTTP server to wind down.
async fn graceful_shutdown(server: JoinHandle<()>, retention: JoinHandle<()>) {
    // Phase 1: the reaper stops between passes.
    info!("phase 1: stopping retention reaper");
    if let Err(e) = retention.await {
        warn!(error = %e, "retention task ended abnormally");
    }

    // Phase 2: in-flight requests drain. Downloads still running after the
    // drain timeout are dropped, which kills their extractor processes.
    info!(
        "phase 2: draining HTTP server ({}s timeout)",
        HTTP_DRAIN_TIMEOUT_SECS
    );
    let abort = server.abort_handle();
    match tokio::time::timeout(Duration::from_secs(HTTP_DRAIN_TIMEOUT_SECS), server).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server task ended abnormally"),
        Err(_) => {
            warn!("HTTP drain timed out, aborting in-flight requests");
            abort.abort();
        }
    }
}

fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
