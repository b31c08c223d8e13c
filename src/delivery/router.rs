use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::core::config::{AppConfig, DeliveryConfig};
use crate::download::DownloadContext;

use super::handlers;
use super::middleware::RequestIdLayer;

// ---------------------------------------------------------------------------
// HTTP router
// ---------------------------------------------------------------------------

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Store, extractor and publishing settings.
    pub downloads: DownloadContext,
    pub config: AppConfig,
    pub start_time: std::time::Instant,
    /// Prometheus metrics handle for rendering /metrics endpoint.
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Build the full Axum router with all routes.
///
/// Route table:
/// - `POST /download`: Fetch and publish media
/// - `GET  /download/{file_name}`: Stream a published file
/// - `GET  /test`: Liveness probe
/// - `GET  /healthz`: Liveness probe with uptime
/// - `GET  /readyz`: Readiness probe
/// - `GET  /metrics`: Prometheus metrics
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.delivery);
    let body_limit = DefaultBodyLimit::max(state.config.security.max_json_body_bytes);

    Router::new()
        .route("/download", post(handlers::download))
        .route("/download/{file_name}", get(handlers::serve_file))
        .route("/test", get(handlers::test_probe))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics_handler))
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(body_limit)
        .layer(RequestIdLayer)
        .with_state(state)
}

/// CORS for the single configured frontend origin; `*` allows any origin.
fn cors_layer(delivery: &DeliveryConfig) -> CorsLayer {
    let origin = delivery.frontend_origin.trim();
    let allow_origin = if origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "invalid frontend origin, cross-origin requests disabled");
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };

    tracing::info!(frontend_origin = origin, "CORS configured");

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers([http::header::CONTENT_TYPE])
        .expose_headers([
            http::header::CONTENT_LENGTH,
            http::header::CONTENT_DISPOSITION,
        ])
        .max_age(std::time::Duration::from_secs(86400))
}
