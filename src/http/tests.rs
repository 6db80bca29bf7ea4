use super::*;
use crate::catalog::VideoCatalog;
use crate::config::HttpConfig;
use crate::error::HttpError;
use crate::pipeline::PipelineState;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn create_test_server(catalog: Arc<VideoCatalog>) -> (Router, watch::Sender<PipelineState>) {
    let (state_tx, state_rx) = watch::channel(PipelineState::IdleWatch);
    let config = HttpConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port: 0,
    };
    let server = CatalogServer::new(config, catalog, state_rx);
    (server.router(), state_tx)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn test_list_videos() {
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    let first = catalog.insert("videos/a.mp4", 100, ["cat"]).unwrap();
    catalog.finalize(&first, 12.5).unwrap();
    catalog.insert("videos/b.mp4", 200, Vec::<String>::new()).unwrap();

    let (router, _state) = create_test_server(catalog);
    let (status, content_type, body) = get(router, "/list_videos").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let videos = json["videos"].as_array().unwrap();
    assert_eq!(videos.len(), 2);
    assert_eq!(videos[0]["id"], first);
    assert_eq!(videos[0]["animals"], serde_json::json!(["cat"]));
    assert_eq!(videos[0]["duration"], 12.5);
    assert_eq!(videos[1]["duration"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_video_streams_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clip.mp4");
    std::fs::write(&path, b"not really an mp4").unwrap();

    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    let id = catalog
        .insert(&path.to_string_lossy(), 100, Vec::<String>::new())
        .unwrap();

    let (router, _state) = create_test_server(catalog);
    let (status, content_type, body) = get(router, &format!("/video/{}", id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("video/mp4"));
    assert_eq!(body, b"not really an mp4");
}

#[tokio::test]
async fn test_video_missing_id_or_file() {
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    let id = catalog
        .insert("/nonexistent/clip.mp4", 100, Vec::<String>::new())
        .unwrap();

    let (router, _state) = create_test_server(catalog);
    let (status, _, _) = get(router.clone(), "/video/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(router, &format!("/video/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_pipeline_state() {
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    catalog.insert("a.mp4", 1, Vec::<String>::new()).unwrap();

    let (router, state) = create_test_server(catalog);
    state.send(PipelineState::ActiveRecording).unwrap();

    let (status, _, body) = get(router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["pipeline"], "active_recording");
    assert_eq!(json["videos"], 1);
    assert_eq!(json["status"], "healthy");
}

fn create_http_config(port: u16) -> HttpConfig {
    HttpConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port,
    }
}

#[tokio::test]
async fn test_bind_reports_address_in_use() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let (_state_tx, state_rx) = watch::channel(PipelineState::IdleWatch);
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());

    let result = CatalogServer::new(create_http_config(port), catalog, state_rx)
        .bind()
        .await;
    assert!(matches!(result, Err(HttpError::BindFailed { .. })));
}

#[tokio::test]
async fn test_bound_server_stops_on_cancel() {
    let (_state_tx, state_rx) = watch::channel(PipelineState::IdleWatch);
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    let bound = CatalogServer::new(create_http_config(0), catalog, state_rx)
        .bind()
        .await
        .unwrap();
    assert_ne!(bound.local_addr().unwrap().port(), 0);

    let token = CancellationToken::new();
    let task = tokio::spawn(bound.serve(token.clone()));
    token.cancel();
    let served = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(served.is_ok());
}
