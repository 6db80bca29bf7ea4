use crate::config::{RecordingConfig, SinkBackend};
use crate::error::SinkError;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Destination for the frames of one recording
pub trait VideoSink: Send {
    /// Append `image` to the output `repeats` times
    fn write(&mut self, image: &RgbImage, repeats: u32) -> Result<(), SinkError>;

    /// Finalize the container on disk
    fn close(self: Box<Self>) -> Result<(), SinkError>;

    fn path(&self) -> &Path;
}

/// Opens sinks for new recordings
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        framerate: f64,
        resolution: (u32, u32),
    ) -> Result<Box<dyn VideoSink>, SinkError>;

    /// Extension of files produced by this factory, without the dot
    fn file_extension(&self) -> &'static str;
}

/// Pick the sink implementation configured in `recording.sink`
pub fn sink_factory_for(config: &RecordingConfig) -> Result<Arc<dyn SinkFactory>, SinkError> {
    match config.sink {
        SinkBackend::Mjpeg => Ok(Arc::new(MjpegFileSinkFactory::default())),
        SinkBackend::Gstreamer => gstreamer_factory(),
    }
}

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
fn gstreamer_factory() -> Result<Arc<dyn SinkFactory>, SinkError> {
    Ok(Arc::new(super::encode::GstSinkFactory::new()?))
}

#[cfg(not(all(target_os = "linux", feature = "video_encoding")))]
fn gstreamer_factory() -> Result<Arc<dyn SinkFactory>, SinkError> {
    Err(SinkError::Open {
        path: String::new(),
        details: "H.264 encoding requires Linux and the video_encoding feature; use sink = \"mjpeg\""
            .to_string(),
    })
}

/// Writes every frame as a JPEG into one motion-JPEG stream file
pub struct MjpegFileSinkFactory {
    quality: u8,
}

impl Default for MjpegFileSinkFactory {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

impl SinkFactory for MjpegFileSinkFactory {
    fn open(
        &self,
        path: &Path,
        framerate: f64,
        resolution: (u32, u32),
    ) -> Result<Box<dyn VideoSink>, SinkError> {
        let file = File::create(path).map_err(|e| SinkError::Open {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        info!(
            "Opened MJPEG sink {} ({}x{} @ {:.1}fps)",
            path.display(),
            resolution.0,
            resolution.1,
            framerate
        );
        Ok(Box::new(MjpegFileSink {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            resolution,
            quality: self.quality,
            frames: 0,
            encoded: Vec::new(),
        }))
    }

    fn file_extension(&self) -> &'static str {
        "mjpeg"
    }
}

pub struct MjpegFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    resolution: (u32, u32),
    quality: u8,
    frames: u64,
    encoded: Vec<u8>,
}

impl VideoSink for MjpegFileSink {
    fn write(&mut self, image: &RgbImage, repeats: u32) -> Result<(), SinkError> {
        if image.dimensions() != self.resolution {
            return Err(SinkError::WriteFailure {
                details: format!(
                    "frame is {}x{}, sink expects {}x{}",
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

        self.encoded.clear();
        JpegEncoder::new_with_quality(&mut self.encoded, self.quality)
            .encode_image(image)
            .map_err(|e| SinkError::WriteFailure {
                details: format!("JPEG encoding failed: {}", e),
            })?;
        for _ in 0..repeats {
            self.writer
                .write_all(&self.encoded)
                .map_err(|e| SinkError::WriteFailure {
                    details: e.to_string(),
                })?;
            self.frames += 1;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), SinkError> {
        self.writer.flush().map_err(|e| SinkError::Finalize {
            details: e.to_string(),
        })?;
        debug!(
            "Closed MJPEG sink {} after {} frames",
            self.path.display(),
            self.frames
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
