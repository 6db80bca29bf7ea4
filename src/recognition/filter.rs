use super::{Detection, DetectorBackend, Recognizer};
use crate::config::RecognitionConfig;
use crate::error::RecognitionError;
use crate::frame::FrameData;
use tracing::trace;

/// Confidence threshold plus keyword match on labels
#[derive(Debug, Clone)]
pub struct LabelFilter {
    threshold: f32,
    keywords: Vec<String>,
}

impl LabelFilter {
    /// An empty keyword list accepts every label
    pub fn new(threshold: f32, keywords: &[String]) -> Self {
        Self {
            threshold,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.threshold, &config.keywords)
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        if detection.confidence <= self.threshold {
            return false;
        }
        if self.keywords.is_empty() {
            return true;
        }
        let label = detection.label.to_lowercase();
        self.keywords.iter().any(|k| label.contains(k.as_str()))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}

/// Detector backend wrapped with a [`LabelFilter`]
pub struct FilteredRecognizer {
    backend: Box<dyn DetectorBackend>,
    filter: LabelFilter,
}

impl FilteredRecognizer {
    pub fn new(backend: Box<dyn DetectorBackend>, filter: LabelFilter) -> Self {
        Self { backend, filter }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl Recognizer for FilteredRecognizer {
    fn recognize(&self, frame: &FrameData) -> Result<Vec<Detection>, RecognitionError> {
        let raw = self.backend.detect(frame)?;
        let total = raw.len();
        let kept = self.filter.apply(raw);
        trace!(
            "{} kept {}/{} detections on frame {}",
            self.backend.name(),
            kept.len(),
            total,
            frame.id
        );
        Ok(kept)
    }
}
