use crate::frame::{FrameFormat, StreamKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WildcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Motion detection error: {0}")]
    Motion(#[from] MotionError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Video sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl WildcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: &str, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to decode {format:?} frame: {details}")]
    Decode { format: FrameFormat, details: String },

    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to capture {stream} frame: {details}")]
    CaptureFailure { stream: StreamKind, details: String },

    #[error("Stream {stream} is already leased by another loop")]
    StreamBusy { stream: StreamKind },

    #[error("Camera configuration failed: {details}")]
    Configuration { details: String },

    #[error("Camera is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("Frame processing failed: {0}")]
    FrameProcessing(#[from] FrameError),
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Inference failed: {details}")]
    Inference { details: String },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open sink at {path}: {details}")]
    Open { path: String, details: String },

    #[error("Failed to write frame: {details}")]
    WriteFailure { details: String },

    #[error("Failed to finalize sink: {details}")]
    Finalize { details: String },
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode labels: {0}")]
    Labels(#[from] serde_json::Error),

    #[error("Video {id} not found")]
    NotFound { id: String },

    #[error("Video {id} is finalized and can no longer change")]
    Finalized { id: String },

    #[error("Failed to prepare catalog storage: {details}")]
    Storage { details: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Frame queue full for {waited_ms}ms, frame dropped")]
    QueueBackpressure { waited_ms: u64 },

    #[error("Too many consecutive capture failures on {stream} ({failures})")]
    CaptureAborted { stream: StreamKind, failures: u32 },

    #[error("Recording session failed: {details}")]
    SessionFailed { details: String },
}

#[cfg(feature = "http")]
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },
}

pub type Result<T> = std::result::Result<T, WildcamError>;
