pub mod analyzer;
pub mod app;
pub mod camera;
pub mod catalog;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(feature = "http")]
pub mod http;
pub mod pipeline;
pub mod recognition;
pub mod recording;

pub use analyzer::{AppliedMode, MotionDetector};
pub use app::{ComponentState, ShutdownReason, WildcamOrchestrator};
pub use camera::{CameraHandle, FrameSource, FrameSourceBuilder, MockFrameSource, StreamLease};
pub use catalog::{CatalogEntry, VideoCatalog};
pub use config::WildcamConfig;
pub use error::{Result, WildcamError};
pub use frame::{FrameData, FrameFormat, StreamKind};
pub use pipeline::{PipelineState, PipelineSupervisor, SupervisorReport, SupervisorSettings};
pub use recognition::{Detection, DetectorBackend, FilteredRecognizer, LabelFilter, Recognizer};
pub use recording::{
    repeat_count, FramePacer, RecordingSession, SessionContext, SessionSummary, SinkFactory,
    StopPolicy, StopReason, VideoSink,
};

#[cfg(feature = "http")]
pub use http::CatalogServer;
