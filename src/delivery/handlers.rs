use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::core::error::{DownloadError, StorageError};
use crate::download::{self, DownloadBody};
use crate::observability::metrics as obs;
use crate::storage::SERVE_CONTENT_TYPE;

use super::router::AppState;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    status: u16,
}

fn error_json(status: StatusCode, error: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        message: message.to_string(),
        status: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

fn download_error_response(e: &DownloadError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_json(status, e.error_code(), &e.to_string())
}

// ---------------------------------------------------------------------------
// Download endpoints
// ---------------------------------------------------------------------------

/// `POST /download`: Fetch remote media and publish it.
///
/// Responds only after the file is in the store. Any JSON problem (wrong
/// content type, malformed body, missing `url`) is a 400, except oversized
/// bodies which keep their 413.
pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadBody>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            obs::inc_download("unknown", "rejected");
            let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            return error_json(status, "invalid_request", &rejection.body_text());
        }
    };

    let request = match download::parse_request(&body, &state.config.extractor.default_quality) {
        Ok(request) => request,
        Err(e) => {
            obs::inc_download("unknown", e.result_label());
            debug!(error = %e, "download request rejected");
            return download_error_response(&e);
        }
    };

    match download::publish_download(&state.downloads, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => download_error_response(&e),
    }
}

/// `GET /download/{file_name}`: Stream a published file.
///
/// The name must be in the sanitized name space and refer to a regular file
/// directly inside the store; everything else is a 404. A retention pass that
/// deletes the file mid-stream can cut the body short.
pub async fn serve_file(State(state): State<AppState>, Path(file_name): Path<String>) -> Response {
    match state.downloads.store.open(&file_name).await {
        Ok((file, info)) => {
            obs::inc_serve_request("ok");
            obs::add_served_bytes(info.size);
            debug!(name = %info.name, size = info.size, "serving file");

            let body = Body::from_stream(ReaderStream::new(file));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, SERVE_CONTENT_TYPE.to_string()),
                    (header::CONTENT_LENGTH, info.size.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", info.name),
                    ),
                ],
                body,
            )
                .into_response()
        }
        Err(StorageError::NotFound { .. }) | Err(StorageError::InvalidName { .. }) => {
            obs::inc_serve_request("not_found");
            error_json(StatusCode::NOT_FOUND, "file_not_found", "File not found")
        }
        Err(e) => {
            obs::inc_serve_request("error");
            error!(name = %file_name, error = %e, "failed to open published file");
            error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "Failed to read file",
            )
        }
    }
}

/// Fallback for unmatched routes.
pub async fn not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "not_found", "Not found")
}

// ---------------------------------------------------------------------------
// Health endpoints
// ---------------------------------------------------------------------------

/// `GET /test`: Liveness probe kept for existing clients.
pub async fn test_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "mediadrop is running",
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let metrics = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
        .into_response()
}

/// `GET /healthz`: Liveness probe.
pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /readyz`: Readiness probe.
///
/// Checks:
/// - Storage: the store directory exists
/// - Extractor: the extractor answers its probe (for yt-dlp, `--version`)
pub async fn readyz(State(state): State<AppState>) -> Response {
    let mut checks = serde_json::Map::new();
    let mut all_ok = true;

    if state.downloads.store.is_available().await {
        checks.insert("storage".to_string(), serde_json::json!({"status": "ok"}));
    } else {
        all_ok = false;
        checks.insert(
            "storage".to_string(),
            serde_json::json!({
                "status": "error",
                "error": format!("store directory {} is missing", state.downloads.store.root().display()),
            }),
        );
    }

    match state.downloads.extractor.probe().await {
        Ok(version) => {
            checks.insert(
                "extractor".to_string(),
                serde_json::json!({"status": "ok", "version": version}),
            );
        }
        Err(e) => {
            all_ok = false;
            checks.insert(
                "extractor".to_string(),
                serde_json::json!({"status": "error", "error": e.to_string()}),
            );
        }
    }

    let status = if all_ok { "ready" } else { "not_ready" };
    let http_status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(serde_json::json!({
            "status": status,
            "checks": checks,
        })),
    )
        .into_response()
}
