//! End-to-end request flows against the router with a scripted extractor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::Router;
use chrono::Utc;
use http::{Request, StatusCode};
use tower::ServiceExt;
use url::Url;

use mediadrop::core::config::AppConfig;
use mediadrop::core::error::ExtractError;
use mediadrop::delivery::router::{build_router, AppState};
use mediadrop::download::DownloadContext;
use mediadrop::extract::{ExtractOptions, ExtractedMedia, MediaExtractor};
use mediadrop::storage::retention::run_retention_pass;
use mediadrop::storage::PublishStore;

const AUDIO_BYTES: &[u8] = b"ID3\x04\x00 fake mp3 payload";

/// Behaves like yt-dlp with `--extract-audio`: reports the pre-transcode
/// name but leaves the transcoded file on disk.
struct FakeExtractor {
    fail_with: Option<&'static str>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    fn working() -> Self {
        Self {
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(message: &'static str) -> Self {
        Self {
            fail_with: Some(message),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn fetch(&self, _url: &Url, options: &ExtractOptions) -> Result<ExtractedMedia, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_with {
            return Err(ExtractError::Failed {
                message: message.to_string(),
            });
        }

        let extension = options.audio_codec.extension();
        tokio::fs::write(options.output_dir.join(format!("My Title.{extension}")), AUDIO_BYTES).await?;
        Ok(ExtractedMedia {
            path: options.output_dir.join("My Title.webm"),
            title: Some("My Title".to_string()),
        })
    }

    async fn probe(&self) -> Result<String, ExtractError> {
        Ok("fake 1.0".to_string())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: PublishStore,
    extractor: Arc<FakeExtractor>,
    app: Router,
}

async fn harness(extractor: FakeExtractor) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.directory = dir.path().to_path_buf();
    config.server.public_base_url = "http://media.test:8000".to_string();

    let store = PublishStore::new(dir.path());
    store.ensure_dir().await.unwrap();

    let extractor = Arc::new(extractor);
    let state = AppState {
        downloads: DownloadContext::from_config(&config, store.clone(), extractor.clone()),
        config,
        start_time: std::time::Instant::now(),
        metrics_handle: metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle(),
    };

    Harness {
        _dir: dir,
        store,
        extractor,
        app: build_router(state),
    }
}

fn post_download(json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/download")
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn published_names(store: &PublishStore) -> Vec<String> {
    store.list().await.unwrap().into_iter().map(|a| a.name).collect()
}

#[tokio::test]
async fn audio_download_is_published_and_served() {
    let h = harness(FakeExtractor::working()).await;

    let response = h
        .app
        .clone()
        .oneshot(post_download(
            r#"{"url": "https://video.example.com/watch?v=abc", "format": "mp3", "quality": "192"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let download_url = body["download_url"].as_str().unwrap();
    assert_eq!(download_url, "http://media.test:8000/download/My-Title.mp3");
    assert_eq!(published_names(&h.store).await, vec!["My-Title.mp3".to_string()]);

    let path = download_url.strip_prefix("http://media.test:8000").unwrap();
    let response = h.app.clone().oneshot(get(path)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], AUDIO_BYTES);
}

#[tokio::test]
async fn repeated_download_overwrites_same_name() {
    let h = harness(FakeExtractor::working()).await;
    let json = r#"{"url": "https://video.example.com/watch?v=abc"}"#;

    for _ in 0..2 {
        let response = h.app.clone().oneshot(post_download(json)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(published_names(&h.store).await, vec!["My-Title.mp3".to_string()]);
}

#[tokio::test]
async fn invalid_url_is_rejected_without_side_effects() {
    let h = harness(FakeExtractor::working()).await;

    let response = h
        .app
        .clone()
        .oneshot(post_download(r#"{"url": "not-a-url"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_url");
    assert_eq!(body["status"], 400);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert!(published_names(&h.store).await.is_empty());
}

#[tokio::test]
async fn extractor_failure_message_is_returned() {
    let h = harness(FakeExtractor::failing("no stream found")).await;

    let response = h
        .app
        .clone()
        .oneshot(post_download(r#"{"url": "https://video.example.com/watch?v=gone"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert_eq!(body["error"], "download_failed");
    assert_eq!(body["message"], "no stream found");
    assert!(published_names(&h.store).await.is_empty());
    assert!(h.store.list_staging().await.unwrap().is_empty());
}

#[tokio::test]
async fn retention_removes_only_expired_files() {
    let h = harness(FakeExtractor::working()).await;
    let now = Utc::now();

    for (name, age) in [
        ("recent.mp3", chrono::Duration::hours(2) + chrono::Duration::minutes(59)),
        ("expired.mp3", chrono::Duration::hours(3) + chrono::Duration::minutes(1)),
    ] {
        let path = h.store.root().join(name);
        std::fs::write(&path, name).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::from(now - age))
            .unwrap();
    }

    let report = run_retention_pass(&h.store, chrono::Duration::hours(3), now)
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(published_names(&h.store).await, vec!["recent.mp3".to_string()]);

    let response = h.app.clone().oneshot(get("/download/expired.mp3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = h.app.clone().oneshot(get("/download/recent.mp3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let h = harness(FakeExtractor::working()).await;

    let response = h
        .app
        .clone()
        .oneshot(get("/download/nonexistent.mp3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["error"], "file_not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = harness(FakeExtractor::working()).await;

    let response = h.app.clone().oneshot(get("/test")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["checks"]["extractor"]["version"], "fake 1.0");

    let response = h.app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
