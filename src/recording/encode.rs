use super::sink::{SinkFactory, VideoSink};
use crate::error::SinkError;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EOS_TIMEOUT_SECS: u64 = 30;

/// H.264 in MP4 through a software GStreamer encoder
pub struct GstSinkFactory;

impl GstSinkFactory {
    pub fn new() -> Result<Self, SinkError> {
        gstreamer::init().map_err(|e| SinkError::Open {
            path: String::new(),
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        Ok(Self)
    }

    fn pipeline_description(path: &Path, framerate: f64, resolution: (u32, u32)) -> String {
        let (fps_num, fps_den) = framerate_fraction(framerate);
        format!(
            "appsrc name=src format=time is-live=false \
             caps=video/x-raw,format=RGB,width={},height={},framerate={}/{} ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset=veryfast bitrate=8000 key-int-max=60 ! \
             video/x-h264,profile=high ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            resolution.0,
            resolution.1,
            fps_num,
            fps_den,
            path.to_string_lossy()
        )
    }
}

impl SinkFactory for GstSinkFactory {
    fn open(
        &self,
        path: &Path,
        framerate: f64,
        resolution: (u32, u32),
    ) -> Result<Box<dyn VideoSink>, SinkError> {
        let open_error = |details: String| SinkError::Open {
            path: path.display().to_string(),
            details,
        };

        let pipeline_desc = Self::pipeline_description(path, framerate, resolution);
        debug!("Creating GStreamer encoding pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| open_error("Failed to get appsrc element".to_string()))?
            .downcast::<AppSrc>()
            .map_err(|_| open_error("Failed to downcast to AppSrc".to_string()))?;

        appsrc.set_property("format", gstreamer::Format::Time);
        appsrc.set_property("is-live", false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        info!(
            "Started H.264 encoding to {} ({}x{} @ {:.1}fps)",
            path.display(),
            resolution.0,
            resolution.1,
            framerate
        );

        Ok(Box::new(GstVideoSink {
            path: path.to_path_buf(),
            pipeline,
            appsrc,
            resolution,
            frame_duration_ns: (1_000_000_000.0 / framerate).round() as u64,
            frames: 0,
        }))
    }

    fn file_extension(&self) -> &'static str {
        "mp4"
    }
}

pub struct GstVideoSink {
    path: PathBuf,
    pipeline: Pipeline,
    appsrc: AppSrc,
    resolution: (u32, u32),
    frame_duration_ns: u64,
    frames: u64,
}

impl VideoSink for GstVideoSink {
    fn write(&mut self, image: &RgbImage, repeats: u32) -> Result<(), SinkError> {
        if image.dimensions() != self.resolution {
            return Err(SinkError::WriteFailure {
                details: format!(
                    "frame is {}x{}, encoder expects {}x{}",
                    image.width(),
                    image.height(),
                    self.resolution.0,
                    self.resolution.1
                ),
            });
        }
        if repeats == 0 {
            return Ok(());
        }

        // Repeats share the pixel memory; only timing metadata differs
        let pixels = gstreamer::Buffer::from_slice(image.as_raw().clone());
        for _ in 0..repeats {
            let mut buffer = pixels.copy();
            {
                let buffer_ref = buffer.get_mut().ok_or_else(|| SinkError::WriteFailure {
                    details: "Buffer is not writable".to_string(),
                })?;
                // Output timing is fixed-rate; the pacer already decided the repeats
                buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(
                    self.frames * self.frame_duration_ns,
                ));
                buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(self.frame_duration_ns));
            }

            self.appsrc
                .push_buffer(buffer)
                .map_err(|e| SinkError::WriteFailure {
                    details: format!("Failed to push buffer: {:?}", e),
                })?;

            self.frames += 1;
            if self.frames % 300 == 0 {
                debug!("Encoded {} frames to {}", self.frames, self.path.display());
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), SinkError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| SinkError::Finalize {
                details: format!("Failed to signal EOS: {:?}", e),
            })?;

        let bus = self.pipeline.bus().ok_or_else(|| SinkError::Finalize {
            details: "Pipeline has no bus".to_string(),
        })?;

        let mut finished = false;
        for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
            match msg.view() {
                gstreamer::MessageView::Eos(..) => {
                    finished = true;
                    break;
                }
                gstreamer::MessageView::Error(err) => {
                    let _ = self.pipeline.set_state(gstreamer::State::Null);
                    return Err(SinkError::Finalize {
                        details: format!(
                            "Encoding error: {} ({})",
                            err.error(),
                            err.debug().unwrap_or_default()
                        ),
                    });
                }
                _ => {}
            }
        }

        if !finished {
            warn!(
                "Encoder for {} did not reach EOS within {}s",
                self.path.display(),
                EOS_TIMEOUT_SECS
            );
        }

        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| SinkError::Finalize {
                details: format!("Failed to stop pipeline: {}", e),
            })?;

        info!(
            "H.264 encoding of {} completed: {} frames",
            self.path.display(),
            self.frames
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Express a frame rate as a GStreamer fraction
fn framerate_fraction(framerate: f64) -> (u64, u64) {
    if (framerate - framerate.round()).abs() < 1e-6 {
        (framerate.round().max(1.0) as u64, 1)
    } else {
        ((framerate * 1000.0).round().max(1.0) as u64, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framerate_fraction() {
        assert_eq!(framerate_fraction(30.0), (30, 1));
        assert_eq!(framerate_fraction(29.97), (29970, 1000));
    }

    #[test]
    fn test_pipeline_description_carries_caps() {
        let desc = GstSinkFactory::pipeline_description(Path::new("/tmp/a.mp4"), 30.0, (1920, 1080));
        assert!(desc.contains("width=1920,height=1080,framerate=30/1"));
        assert!(desc.contains("filesink location=/tmp/a.mp4"));
    }
}
