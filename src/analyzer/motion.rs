use crate::config::{MotionConfig, MotionMode};
use crate::error::MotionError;
use crate::frame::FrameData;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::box_filter,
    morphology::dilate,
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Algorithm actually applied to a frame after auto-mode resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedMode {
    Normal,
    LowLight,
}

/// Exponentially weighted running average of smoothed intensity
struct Background {
    width: u32,
    height: u32,
    average: Vec<f32>,
}

impl Background {
    fn seed(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            average: image.pixels().map(|p| p.0[0] as f32).collect(),
        }
    }

    fn matches(&self, image: &GrayImage) -> bool {
        self.width == image.width() && self.height == image.height()
    }

    fn difference(&self, current: &GrayImage) -> GrayImage {
        let data = self
            .average
            .iter()
            .zip(current.pixels())
            .map(|(bg, px)| (px.0[0] as f32 - bg).abs().round().min(255.0) as u8)
            .collect();
        // Dimensions were checked by matches()
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    fn accumulate(&mut self, current: &GrayImage, alpha: f32) {
        for (bg, px) in self.average.iter_mut().zip(current.pixels()) {
            *bg = (1.0 - alpha) * *bg + alpha * px.0[0] as f32;
        }
    }
}

/// Stateful motion detector for a single camera stream
pub struct MotionDetector {
    config: MotionConfig,
    background: Option<Background>,
    last_motion: bool,
    last_mode: Option<AppliedMode>,
    frame_count: u64,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        debug!("Creating motion detector with config: {:?}", config);
        Self {
            config,
            background: None,
            last_motion: false,
            last_mode: None,
            frame_count: 0,
        }
    }

    /// Evaluate one frame against the background model
    ///
    /// The first frame after construction or [`reset`](Self::reset), and any
    /// frame whose dimensions differ from the model, only seeds the background
    /// and reports no motion.
    pub fn detect(&mut self, frame: &FrameData) -> Result<bool, MotionError> {
        let gray = frame.to_gray_image()?;
        let blurred = box_filter(&gray, self.config.blur_radius, self.config.blur_radius);
        self.frame_count += 1;

        let reseed = match &self.background {
            Some(bg) if !bg.matches(&blurred) => {
                info!(
                    "Frame {} dimensions changed to {}x{}, re-seeding {} background",
                    frame.id, frame.width, frame.height, frame.stream
                );
                true
            }
            Some(_) => false,
            None => {
                debug!("Seeding {} background from frame {}", frame.stream, frame.id);
                true
            }
        };
        if reseed {
            self.background = Some(Background::seed(&blurred));
            self.last_motion = false;
            self.last_mode = None;
            return Ok(false);
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(false);
        };

        let mode = match self.config.mode {
            MotionMode::Normal => AppliedMode::Normal,
            MotionMode::LowLight => AppliedMode::LowLight,
            MotionMode::Auto => {
                if intensity_std_dev(&blurred) < self.config.contrast_floor {
                    AppliedMode::LowLight
                } else {
                    AppliedMode::Normal
                }
            }
        };

        let diff = background.difference(&blurred);
        let motion = match mode {
            AppliedMode::Normal => {
                let cutoff = (255.0 * self.config.sensitivity).round().clamp(0.0, 255.0) as u8;
                let mask = dilate(
                    &threshold(&diff, cutoff),
                    Norm::LInf,
                    self.config.dilate_radius,
                );
                let largest = largest_component_area(&connected_components(
                    &mask,
                    Connectivity::Eight,
                    Luma([0u8]),
                ));
                trace!(
                    "Frame {} normal mode: largest region {} px (min {})",
                    frame.id,
                    largest,
                    self.config.min_area
                );
                largest > self.config.min_area
            }
            AppliedMode::LowLight => {
                let changed = diff
                    .pixels()
                    .filter(|p| p.0[0] > self.config.low_light_threshold)
                    .count() as u64;
                let pixels = diff.width() as u64 * diff.height() as u64;
                let limit = (self.config.min_area as u64)
                    .max((pixels as f32 * self.config.low_light_area_fraction) as u64);
                trace!(
                    "Frame {} low-light mode: {} changed px (limit {})",
                    frame.id,
                    changed,
                    limit
                );
                changed > limit
            }
        };

        background.accumulate(&blurred, self.config.background_alpha);

        if motion != self.last_motion {
            debug!(
                "Motion on {} stream {} at frame {} ({:?})",
                frame.stream,
                if motion { "started" } else { "stopped" },
                frame.id,
                mode
            );
        }
        self.last_motion = motion;
        self.last_mode = Some(mode);
        Ok(motion)
    }

    /// Result of the most recent evaluation
    pub fn status(&self) -> bool {
        self.last_motion
    }

    /// Algorithm used for the most recent evaluation, `None` while seeding
    pub fn last_mode(&self) -> Option<AppliedMode> {
        self.last_mode
    }

    /// Discard the background so the next frame re-seeds
    pub fn reset(&mut self) {
        debug!(
            "Resetting motion detector after {} frames",
            self.frame_count
        );
        self.background = None;
        self.last_motion = false;
        self.last_mode = None;
        self.frame_count = 0;
    }

    pub fn is_seeded(&self) -> bool {
        self.background.is_some()
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }
}

fn intensity_std_dev(image: &GrayImage) -> f32 {
    let n = (image.width() as f64) * (image.height() as f64);
    if n == 0.0 {
        return 0.0;
    }
    let (sum, sum_sq) = image.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    ((sum_sq / n - mean * mean).max(0.0)).sqrt() as f32
}

fn largest_component_area(components: &ImageBuffer<Luma<u32>, Vec<u32>>) -> u32 {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for pixel in components.pixels() {
        if pixel[0] > 0 {
            *counts.entry(pixel[0]).or_insert(0) += 1;
        }
    }
    counts.values().max().copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StreamKind;
    use image::{Rgb, RgbImage};
    use std::time::SystemTime;

    const W: u32 = 160;
    const H: u32 = 120;

    fn create_test_frame(id: u64, image: RgbImage) -> FrameData {
        FrameData::from_rgb(id, SystemTime::now(), image, StreamKind::Lores)
    }

    fn flat(level: u8) -> RgbImage {
        RgbImage::from_pixel(W, H, Rgb([level, level, level]))
    }

    fn textured() -> RgbImage {
        RgbImage::from_fn(W, H, |x, y| {
            if ((x / 16) + (y / 16)) % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([20, 20, 20])
            }
        })
    }

    fn with_square(mut base: RgbImage, x0: u32, y0: u32, size: u32, level: u8) -> RgbImage {
        for y in y0..(y0 + size).min(H) {
            for x in x0..(x0 + size).min(W) {
                base.put_pixel(x, y, Rgb([level, level, level]));
            }
        }
        base
    }

    fn normal_config() -> MotionConfig {
        MotionConfig {
            mode: MotionMode::Normal,
            ..MotionConfig::default()
        }
    }

    #[test]
    fn test_first_frame_only_seeds() {
        let mut detector = MotionDetector::new(normal_config());
        assert!(!detector.is_seeded());
        assert!(!detector.detect(&create_test_frame(1, textured())).unwrap());
        assert!(detector.is_seeded());
        assert_eq!(detector.last_mode(), None);
    }

    #[test]
    fn test_static_scene_never_reports_motion() {
        for mode in [MotionMode::Normal, MotionMode::LowLight, MotionMode::Auto] {
            let mut detector = MotionDetector::new(MotionConfig {
                mode,
                ..MotionConfig::default()
            });
            for id in 0..10 {
                assert!(!detector.detect(&create_test_frame(id, textured())).unwrap());
            }
            assert!(!detector.status());
        }
    }

    #[test]
    fn test_large_change_detected_within_one_call() {
        let mut detector = MotionDetector::new(normal_config());
        detector.detect(&create_test_frame(1, flat(0))).unwrap();
        detector.detect(&create_test_frame(2, flat(0))).unwrap();

        let moved = with_square(flat(0), 60, 40, 40, 255);
        assert!(detector.detect(&create_test_frame(3, moved)).unwrap());
        assert!(detector.status());
        assert_eq!(detector.last_mode(), Some(AppliedMode::Normal));
    }

    #[test]
    fn test_small_change_below_min_area_ignored() {
        let mut detector = MotionDetector::new(normal_config());
        detector.detect(&create_test_frame(1, flat(0))).unwrap();

        let speck = with_square(flat(0), 70, 50, 8, 255);
        assert!(!detector.detect(&create_test_frame(2, speck)).unwrap());
    }

    fn boundary_config(min_area: u32, blur_radius: u32, dilate_radius: u8) -> MotionConfig {
        MotionConfig {
            mode: MotionMode::Normal,
            sensitivity: 0.5,
            min_area,
            blur_radius,
            dilate_radius,
            ..MotionConfig::default()
        }
    }

    fn region_reported(config: MotionConfig) -> bool {
        let mut detector = MotionDetector::new(config);
        detector.detect(&create_test_frame(1, flat(0))).unwrap();
        detector
            .detect(&create_test_frame(2, with_square(flat(0), 40, 40, 10, 255)))
            .unwrap()
    }

    #[test]
    fn test_region_must_exceed_min_area() {
        // Unsmoothed, undilated: the region is exactly the 10x10 square
        assert!(region_reported(boundary_config(99, 0, 0)));
        assert!(!region_reported(boundary_config(100, 0, 0)));
    }

    #[test]
    fn test_min_area_counts_blurred_and_dilated_region() {
        // A 3x3 blur drops the four square corners below half intensity,
        // then dilation by one grows the 96 px region to 12x12 minus corners
        assert!(region_reported(boundary_config(95, 1, 0)));
        assert!(!region_reported(boundary_config(96, 1, 0)));
        assert!(region_reported(boundary_config(139, 1, 1)));
        assert!(!region_reported(boundary_config(140, 1, 1)));
    }

    #[test]
    fn test_reset_forces_reseed() {
        let mut detector = MotionDetector::new(normal_config());
        detector.detect(&create_test_frame(1, flat(0))).unwrap();
        detector.reset();
        assert!(!detector.is_seeded());

        // Would be motion against the old background, but only seeds now
        let changed = with_square(flat(0), 60, 40, 40, 255);
        assert!(!detector.detect(&create_test_frame(2, changed)).unwrap());
        assert!(!detector.status());
    }

    #[test]
    fn test_dimension_change_reseeds() {
        let mut detector = MotionDetector::new(normal_config());
        detector.detect(&create_test_frame(1, flat(0))).unwrap();

        let bigger = RgbImage::from_pixel(W * 2, H * 2, Rgb([255, 255, 255]));
        assert!(!detector.detect(&create_test_frame(2, bigger.clone())).unwrap());
        assert!(!detector.detect(&create_test_frame(3, bigger)).unwrap());
    }

    #[test]
    fn test_low_light_ignores_sensitivity() {
        let mut detector = MotionDetector::new(MotionConfig {
            mode: MotionMode::LowLight,
            sensitivity: 1.0,
            ..MotionConfig::default()
        });
        detector.detect(&create_test_frame(1, flat(10))).unwrap();

        // A 30-level change would never pass a 255 threshold
        let glow = with_square(flat(10), 50, 30, 40, 40);
        assert!(detector.detect(&create_test_frame(2, glow)).unwrap());
        assert_eq!(detector.last_mode(), Some(AppliedMode::LowLight));
    }

    #[test]
    fn test_auto_mode_selects_by_contrast() {
        let mut detector = MotionDetector::new(MotionConfig::default());
        detector.detect(&create_test_frame(1, flat(5))).unwrap();
        detector.detect(&create_test_frame(2, flat(5))).unwrap();
        assert_eq!(detector.last_mode(), Some(AppliedMode::LowLight));

        detector.reset();
        detector.detect(&create_test_frame(3, textured())).unwrap();
        detector.detect(&create_test_frame(4, textured())).unwrap();
        assert_eq!(detector.last_mode(), Some(AppliedMode::Normal));
    }

    #[test]
    fn test_background_adapts_to_new_scene() {
        let mut detector = MotionDetector::new(normal_config());
        detector.detect(&create_test_frame(1, flat(0))).unwrap();

        let scene = with_square(flat(0), 60, 40, 40, 255);
        assert!(detector.detect(&create_test_frame(2, scene.clone())).unwrap());

        // The change settles into the average after a few frames
        let mut last = true;
        for id in 3..12 {
            last = detector.detect(&create_test_frame(id, scene.clone())).unwrap();
        }
        assert!(!last);
    }
}
