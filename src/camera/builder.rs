use super::interface::{CameraHandle, FrameSource};
use super::mock::MockFrameSource;
use crate::config::{CameraBackend, CameraConfig};
use crate::error::{Result, WildcamError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds the frame source selected by `camera.backend`
pub struct FrameSourceBuilder {
    config: Option<CameraConfig>,
}

impl FrameSourceBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<CameraHandle> {
        let config = self
            .config
            .ok_or_else(|| WildcamError::system("Camera configuration must be specified"))?;
        let capture_timeout = Duration::from_millis(config.capture_timeout_ms);

        let source: Arc<dyn FrameSource> = match config.backend {
            CameraBackend::Mock => Arc::new(MockFrameSource::new(config)),
            CameraBackend::Gstreamer => Self::gstreamer_source(config)?,
        };

        info!("Camera backend '{}' ready", source.name());
        Ok(CameraHandle::new(source, capture_timeout))
    }

    #[cfg(all(target_os = "linux", feature = "camera"))]
    fn gstreamer_source(config: CameraConfig) -> Result<Arc<dyn FrameSource>> {
        Ok(Arc::new(super::gstreamer::GstFrameSource::new(config)?))
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    fn gstreamer_source(_config: CameraConfig) -> Result<Arc<dyn FrameSource>> {
        Err(crate::error::CameraError::Configuration {
            details: "GStreamer camera requires Linux and the camera feature; use backend = \"mock\""
                .to_string(),
        }
        .into())
    }
}

impl Default for FrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
