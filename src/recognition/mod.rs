mod filter;

pub use filter::{FilteredRecognizer, LabelFilter};

use crate::error::RecognitionError;
use crate::frame::FrameData;
use serde::Serialize;

/// Labeled bounding box in the pixel space of the source frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Raw object detector producing unfiltered detections
///
/// Model formats and inference engines live behind this trait.
/// Implementations must not retain the frame beyond the call.
pub trait DetectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, RecognitionError>;
}

/// Recognition capability consumed by recording sessions
pub trait Recognizer: Send + Sync {
    /// Detections in `frame` that pass the configured filter
    fn recognize(&self, frame: &FrameData) -> Result<Vec<Detection>, RecognitionError>;
}
