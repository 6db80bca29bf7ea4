use super::interface::FrameSource;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat, StreamKind};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// V4L2 camera decoded to RGB and split into main and low-resolution appsinks
pub struct GstFrameSource {
    config: CameraConfig,
    pipeline: Pipeline,
    main_sink: AppSink,
    lores_sink: AppSink,
    running: AtomicBool,
    closed: AtomicBool,
    main_counter: AtomicU64,
    lores_counter: AtomicU64,
}

impl GstFrameSource {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        info!(
            "Initializing GStreamer camera for device {} ({}x{} @ {}fps, lores {}x{})",
            config.index,
            config.resolution.0,
            config.resolution.1,
            config.fps,
            config.lores_resolution.0,
            config.lores_resolution.1
        );

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = Self::build_pipeline_string(&config);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let main_sink = Self::appsink(&pipeline, "main")?;
        let lores_sink = Self::appsink(&pipeline, "lores")?;

        Ok(Self {
            config,
            pipeline,
            main_sink,
            lores_sink,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            main_counter: AtomicU64::new(0),
            lores_counter: AtomicU64::new(0),
        })
    }

    fn build_pipeline_string(config: &CameraConfig) -> String {
        let (width, height) = config.resolution;
        let (lores_width, lores_height) = config.lores_resolution;

        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             jpegdec ! videoconvert ! video/x-raw,format=RGB ! tee name=t \
             t. ! queue max-size-buffers=2 leaky=downstream ! \
             appsink name=main sync=false max-buffers=1 drop=true enable-last-sample=false \
             t. ! queue max-size-buffers=2 leaky=downstream ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=lores sync=false max-buffers=1 drop=true enable-last-sample=false",
            config.index, width, height, config.fps, lores_width, lores_height
        )
    }

    fn appsink(pipeline: &Pipeline, name: &str) -> Result<AppSink, CameraError> {
        pipeline
            .by_name(name)
            .ok_or_else(|| CameraError::Configuration {
                details: format!("Failed to get appsink {}", name),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: format!("Element {} is not an AppSink", name),
            })
    }

    fn sample_to_frame(
        sample: &gstreamer::Sample,
        id: u64,
        stream: StreamKind,
    ) -> Result<FrameData, CameraError> {
        let failure = |details: String| CameraError::CaptureFailure { stream, details };

        let buffer = sample
            .buffer()
            .ok_or_else(|| failure("No buffer in sample".to_string()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| failure("No caps in sample".to_string()))?;
        let info = VideoInfo::from_caps(caps)
            .map_err(|e| failure(format!("Failed to get video info: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| failure(format!("Failed to map buffer: {}", e)))?;

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * 3;
        let stride = info.stride()[0] as usize;

        // Rows may be padded to the stride
        let data = if stride == row_bytes {
            map.as_slice().to_vec()
        } else {
            let mut packed = Vec::with_capacity(row_bytes * height as usize);
            for row in map.as_slice().chunks(stride).take(height as usize) {
                packed.extend_from_slice(&row[..row_bytes.min(row.len())]);
            }
            packed
        };

        Ok(FrameData::new(
            id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Rgb24,
            stream,
        ))
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    async fn start(&self) -> Result<(), CameraError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("GStreamer camera already running");
            return Ok(());
        }

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to start pipeline: {}", e),
            })?;
        info!("GStreamer camera pipeline started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CameraError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop camera pipeline: {}", e);
        }
        info!("GStreamer camera pipeline stopped");
        Ok(())
    }

    async fn close(&self) -> Result<(), CameraError> {
        self.stop().await?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn capture(&self, stream: StreamKind) -> Result<FrameData, CameraError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(CameraError::CaptureFailure {
                stream,
                details: "camera not started".to_string(),
            });
        }

        let (sink, counter) = match stream {
            StreamKind::Main => (self.main_sink.clone(), &self.main_counter),
            StreamKind::Lores => (self.lores_sink.clone(), &self.lores_counter),
        };
        let timeout = gstreamer::ClockTime::from_mseconds(self.config.capture_timeout_ms);

        let sample = tokio::task::spawn_blocking(move || sink.try_pull_sample(timeout))
            .await
            .map_err(|e| CameraError::CaptureFailure {
                stream,
                details: format!("capture task failed: {}", e),
            })?
            .ok_or_else(|| CameraError::CaptureFailure {
                stream,
                details: "no sample available (timeout or end of stream)".to_string(),
            })?;

        let id = counter.fetch_add(1, Ordering::Relaxed);
        let frame = Self::sample_to_frame(&sample, id, stream)?;
        trace!(
            "Captured {} frame {} ({}x{})",
            stream,
            id,
            frame.width,
            frame.height
        );
        Ok(frame)
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
