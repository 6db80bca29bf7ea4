use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use super::server::ServerState;

fn content_type_for(filename: &str) -> &'static str {
    match std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some("mp4") => "video/mp4",
        Some("mjpeg") => "video/x-motion-jpeg",
        _ => "application/octet-stream",
    }
}

/// Every catalog row, oldest first
pub async fn list_videos_handler(State(state): State<ServerState>) -> Response {
    match state.catalog.list_all() {
        Ok(videos) => {
            debug!("Listing {} videos", videos.len());
            Json(serde_json::json!({ "videos": videos })).into_response()
        }
        Err(e) => {
            error!("Failed to list videos: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "catalog unavailable").into_response()
        }
    }
}

/// Stream one recording file by catalog id
pub async fn video_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let entry = match state.catalog.get(&id) {
        Ok(Some(entry)) => entry,
        Ok(None) => return (StatusCode::NOT_FOUND, "video not found").into_response(),
        Err(e) => {
            error!("Failed to look up video {}: {}", id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "catalog unavailable").into_response();
        }
    };

    let file = match tokio::fs::File::open(&entry.filename).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Video {} file {} unavailable: {}", id, entry.filename, e);
            return (StatusCode::NOT_FOUND, "video file missing").into_response();
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&entry.filename));
    if let Ok(metadata) = file.metadata().await {
        response = response.header(header::CONTENT_LENGTH, metadata.len());
    }

    match response.body(Body::from_stream(ReaderStream::new(file))) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build response for video {}: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let pipeline = *state.pipeline.borrow();
    let videos = state.catalog.count().ok();

    let health_info = serde_json::json!({
        "status": if videos.is_some() { "healthy" } else { "degraded" },
        "pipeline": pipeline,
        "videos": videos,
    });

    (StatusCode::OK, Json(health_info))
}
