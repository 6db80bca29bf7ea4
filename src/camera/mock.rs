use super::interface::FrameSource;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, StreamKind};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{info, trace};

/// Synthetic camera for running without hardware
///
/// Produces a static gradient scene on both streams. With
/// `mock_moving_object` a bright square sweeps across the scene so the
/// motion pipeline has something to react to.
pub struct MockFrameSource {
    config: CameraConfig,
    running: AtomicBool,
    closed: AtomicBool,
    main_counter: AtomicU64,
    lores_counter: AtomicU64,
}

impl MockFrameSource {
    pub fn new(config: CameraConfig) -> Self {
        info!(
            "Initializing mock camera ({}x{} main, {}x{} lores, moving object: {})",
            config.resolution.0,
            config.resolution.1,
            config.lores_resolution.0,
            config.lores_resolution.1,
            config.mock_moving_object
        );
        Self {
            config,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            main_counter: AtomicU64::new(0),
            lores_counter: AtomicU64::new(0),
        }
    }

    fn render(&self, width: u32, height: u32, tick: u64) -> RgbImage {
        let mut image = RgbImage::from_fn(width, height, |x, y| {
            let shade = (40 + (x * 120 / width.max(1)) + (y * 60 / height.max(1))) as u8;
            Rgb([shade / 2, shade, shade / 3])
        });

        if self.config.mock_moving_object {
            let size = (width / 6).max(1);
            let span = width.saturating_sub(size).max(1) as u64;
            let x0 = ((tick * 4) % span) as u32;
            let y0 = height.saturating_sub(size) / 2;
            for y in y0..(y0 + size).min(height) {
                for x in x0..(x0 + size).min(width) {
                    image.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }

        image
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn start(&self) -> Result<(), CameraError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Release);
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Mock camera closed");
        }
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

        let (counter, (width, height)) = match stream {
            StreamKind::Main => (&self.main_counter, self.config.resolution),
            StreamKind::Lores => (&self.lores_counter, self.config.lores_resolution),
        };
        let id = counter.fetch_add(1, Ordering::Relaxed);
        // Both streams share one scene clock so the object lines up across them
        let tick = self.main_counter.load(Ordering::Relaxed) + self.lores_counter.load(Ordering::Relaxed);

        let frame = FrameData::from_rgb(
            id,
            SystemTime::now(),
            self.render(width, height, tick),
            stream,
        );
        trace!("Generated mock {} frame {}", stream, id);
        Ok(frame)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
