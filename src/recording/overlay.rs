use crate::config::RecordingConfig;
use crate::recognition::Detection;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::time::SystemTime;
use tracing::warn;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Resolve configured timezone, falling back to UTC on parse errors
pub fn resolve_timestamp_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(
                "Invalid timestamp timezone '{}', falling back to UTC",
                tz_name
            );
            chrono_tz::UTC
        }
    }
}

/// Draws detection boxes and an optional timestamp onto recorded frames
pub struct FrameAnnotator {
    draw_boxes: bool,
    draw_timestamp: bool,
    font: Option<Font<'static>>,
    scale: Scale,
    timezone: Tz,
}

impl FrameAnnotator {
    pub fn from_config(config: &RecordingConfig) -> Self {
        let font = if config.annotate || config.timestamp_overlay {
            load_font(&config.font_path)
        } else {
            None
        };

        Self {
            draw_boxes: config.annotate,
            draw_timestamp: config.timestamp_overlay,
            font,
            scale: Scale::uniform(config.font_size),
            timezone: resolve_timestamp_timezone(&config.timestamp_timezone),
        }
    }

    /// Annotator that leaves frames untouched
    pub fn disabled() -> Self {
        Self {
            draw_boxes: false,
            draw_timestamp: false,
            font: None,
            scale: Scale::uniform(1.0),
            timezone: chrono_tz::UTC,
        }
    }

    pub fn is_active(&self) -> bool {
        self.draw_boxes || self.draw_timestamp
    }

    pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection], timestamp: SystemTime) {
        if self.draw_boxes {
            for detection in detections {
                self.draw_detection(image, detection);
            }
        }
        if self.draw_timestamp {
            self.draw_timestamp(image, timestamp);
        }
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let (img_w, img_h) = image.dimensions();
        if detection.x >= img_w || detection.y >= img_h {
            return;
        }
        let width = detection.width.min(img_w - detection.x).max(1);
        let height = detection.height.min(img_h - detection.y).max(1);

        let rect = Rect::at(detection.x as i32, detection.y as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
        if width > 2 && height > 2 {
            let inner = Rect::at(detection.x as i32 + 1, detection.y as i32 + 1)
                .of_size(width - 2, height - 2);
            draw_hollow_rect_mut(image, inner, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let text = format!("{} {:.0}%", detection.label, detection.confidence * 100.0);
            let (_, text_h) = text_size(self.scale, font, &text);
            let y = (detection.y as i32 - text_h - 2).max(0);
            draw_text_mut(
                image,
                BOX_COLOR,
                detection.x as i32 + 2,
                y,
                self.scale,
                font,
                &text,
            );
        }
    }

    fn draw_timestamp(&self, image: &mut RgbImage, timestamp: SystemTime) {
        let Some(font) = &self.font else {
            return;
        };

        let datetime = DateTime::<Utc>::from(timestamp).with_timezone(&self.timezone);
        let text = datetime.format("%Y-%m-%d %H:%M:%S%.3f %Z").to_string();
        let (text_w, text_h) = text_size(self.scale, font, &text);

        let x: i32 = 10;
        let y = image.height() as i32 - (self.scale.y * 1.5) as i32;
        let background = Rect::at(x - 5, y - 5).of_size(
            (text_w + 10).max(1) as u32,
            (text_h + 10).max(1) as u32,
        );
        draw_filled_rect_mut(image, background, TEXT_BACKGROUND);
        draw_text_mut(image, TEXT_COLOR, x, y, self.scale, font, &text);
    }
}

fn load_font(path: &str) -> Option<Font<'static>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(
                "Failed to read font file '{}': {}; labels and timestamps disabled",
                path, e
            );
            return None;
        }
    };
    let font = Font::try_from_vec(data);
    if font.is_none() {
        warn!("Failed to parse font file '{}'", path);
    }
    font
}
