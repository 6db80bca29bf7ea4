use crate::error::FrameError;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Camera stream a frame was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Full-resolution stream used for recorded video
    Main,
    /// Reduced-resolution stream used for idle motion polling
    Lores,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Main => "main",
            StreamKind::Lores => "lores",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier, increasing within a stream
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub stream: StreamKind,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
        stream: StreamKind,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
            stream,
        }
    }

    /// Wrap an RGB image as a frame
    pub fn from_rgb(id: u64, timestamp: SystemTime, image: RgbImage, stream: StreamKind) -> Self {
        let (width, height) = image.dimensions();
        Self::new(
            id,
            timestamp,
            image.into_raw(),
            width,
            height,
            FrameFormat::Rgb24,
            stream,
        )
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    fn check_size(&self) -> Result<(), FrameError> {
        match self.expected_size() {
            Some(expected) if expected != self.data.len() => Err(FrameError::BufferSize {
                expected,
                actual: self.data.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Decode into an owned RGB image
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        self.check_size()?;
        match self.format {
            FrameFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| FrameError::Decode {
                    format: self.format,
                    details: "buffer does not match dimensions".to_string(),
                }),
            FrameFormat::Yuyv => Ok(yuyv_to_rgb(&self.data, self.width, self.height)),
            FrameFormat::Mjpeg => image::load_from_memory(&self.data)
                .map(|img| img.to_rgb8())
                .map_err(|e| FrameError::Decode {
                    format: self.format,
                    details: e.to_string(),
                }),
        }
    }

    /// Decode into a single intensity channel
    pub fn to_gray_image(&self) -> Result<GrayImage, FrameError> {
        self.check_size()?;
        match self.format {
            // Luma is every other byte in YUYV
            FrameFormat::Yuyv => {
                let luma: Vec<u8> = self.data.iter().step_by(2).copied().collect();
                GrayImage::from_raw(self.width, self.height, luma).ok_or_else(|| {
                    FrameError::Decode {
                        format: self.format,
                        details: "buffer does not match dimensions".to_string(),
                    }
                })
            }
            FrameFormat::Rgb24 => {
                let rgb = self.to_rgb_image()?;
                Ok(image::DynamicImage::ImageRgb8(rgb).to_luma8())
            }
            FrameFormat::Mjpeg => image::load_from_memory(&self.data)
                .map(|img| img.to_luma8())
                .map_err(|e| FrameError::Decode {
                    format: self.format,
                    details: e.to_string(),
                }),
        }
    }

    /// Seconds since the Unix epoch of the capture timestamp
    pub fn unix_seconds(&self) -> f64 {
        unix_seconds(self.timestamp)
    }
}

/// Signed seconds from `earlier` to `later`
pub fn seconds_between(earlier: SystemTime, later: SystemTime) -> f64 {
    match later.duration_since(earlier) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

pub fn unix_seconds(timestamp: SystemTime) -> f64 {
    seconds_between(UNIX_EPOCH, timestamp)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    // Size was checked by the caller, odd widths leave a trailing pixel
    rgb.resize(width as usize * height as usize * 3, 0);
    RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height))
}

// BT.601 limited range
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_format_properties() {
        assert_eq!(FrameFormat::Mjpeg.bytes_per_pixel(), 0);
        assert_eq!(FrameFormat::Yuyv.bytes_per_pixel(), 2);
        assert_eq!(FrameFormat::Rgb24.bytes_per_pixel(), 3);
        assert!(FrameFormat::Mjpeg.is_compressed());
        assert!(!FrameFormat::Rgb24.is_compressed());
    }

    #[test]
    fn test_stream_kind_display() {
        assert_eq!(StreamKind::Main.to_string(), "main");
        assert_eq!(StreamKind::Lores.to_string(), "lores");
    }

    #[test]
    fn test_rgb_frame_to_gray() {
        let image = RgbImage::from_pixel(4, 2, image::Rgb([200, 200, 200]));
        let frame = FrameData::from_rgb(1, SystemTime::now(), image, StreamKind::Main);
        let gray = frame.to_gray_image().unwrap();
        assert_eq!(gray.dimensions(), (4, 2));
        assert!(gray.pixels().all(|p| p.0[0] == 200));
    }

    #[test]
    fn test_yuyv_gray_uses_luma() {
        // Two pixels: Y0=50 U=128 Y1=150 V=128
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![50, 128, 150, 128],
            2,
            1,
            FrameFormat::Yuyv,
            StreamKind::Lores,
        );
        let gray = frame.to_gray_image().unwrap();
        assert_eq!(gray.get_pixel(0, 0).0[0], 50);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);

        let rgb = frame.to_rgb_image().unwrap();
        let p = rgb.get_pixel(1, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![0u8; 10],
            640,
            480,
            FrameFormat::Rgb24,
            StreamKind::Main,
        );
        assert!(matches!(
            frame.to_rgb_image(),
            Err(FrameError::BufferSize { .. })
        ));
    }

    #[test]
    fn test_seconds_between_is_signed() {
        let t0 = UNIX_EPOCH + Duration::from_secs(100);
        let t1 = t0 + Duration::from_millis(250);
        assert_eq!(seconds_between(t0, t1), 0.25);
        assert_eq!(seconds_between(t1, t0), -0.25);
        assert_eq!(unix_seconds(t0), 100.0);
    }
}
