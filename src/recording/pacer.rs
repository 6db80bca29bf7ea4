use crate::frame::seconds_between;
use std::time::SystemTime;

/// Number of times a frame must be written so playback tracks wall-clock time
///
/// Always at least one. Negative gaps (clock adjustments) also yield one.
pub fn repeat_count(prev: SystemTime, new: SystemTime, target_framerate: f64) -> u32 {
    let slots = (seconds_between(prev, new) * target_framerate).round();
    if slots.is_finite() && slots > 1.0 {
        slots.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

/// Tracks the previously paced frame of one session
#[derive(Debug)]
pub struct FramePacer {
    target_framerate: f64,
    previous: Option<SystemTime>,
    written: u64,
}

impl FramePacer {
    pub fn new(target_framerate: f64) -> Self {
        Self {
            target_framerate,
            previous: None,
            written: 0,
        }
    }

    /// Repeat count for a newly captured frame; the first frame is written once
    pub fn pace(&mut self, timestamp: SystemTime) -> u32 {
        let count = match self.previous {
            None => 1,
            Some(prev) => repeat_count(prev, timestamp, self.target_framerate),
        };
        self.previous = Some(timestamp);
        self.written += count as u64;
        count
    }

    /// Total output frames scheduled so far
    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn target_framerate(&self) -> f64 {
        self.target_framerate
    }
}
