use crate::frame::seconds_between;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Why a recording session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Recording reached the configured duration limit
    DurationCap,
    /// No motion on the main stream for the motion timeout
    MotionTimeout,
    /// No recognized detections for the motion timeout
    DetectionInactivity,
    /// Producer closed the frame queue
    SourceEnded,
    /// No frame arrived within the starvation timeout
    SourceStalled,
    /// Process shutdown was requested
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::DurationCap => "duration cap",
            StopReason::MotionTimeout => "motion timeout",
            StopReason::DetectionInactivity => "detection inactivity",
            StopReason::SourceEnded => "source ended",
            StopReason::SourceStalled => "source stalled",
            StopReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Session clocks checked by the stop policy, all in frame time
#[derive(Debug, Clone, Copy)]
pub struct SessionClocks {
    pub start_time: SystemTime,
    pub last_motion_time: SystemTime,
    /// `None` when recognition is disabled
    pub last_detection_time: Option<SystemTime>,
}

/// Per-frame stop conditions, evaluated in priority order
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub duration_limit: Duration,
    pub motion_timeout: Duration,
}

impl StopPolicy {
    pub fn new(duration_limit: Duration, motion_timeout: Duration) -> Self {
        Self {
            duration_limit,
            motion_timeout,
        }
    }

    /// First condition that holds at `frame_time`, if any
    pub fn evaluate(&self, clocks: &SessionClocks, frame_time: SystemTime) -> Option<StopReason> {
        let limit = self.duration_limit.as_secs_f64();
        let timeout = self.motion_timeout.as_secs_f64();

        if seconds_between(clocks.start_time, frame_time) >= limit {
            return Some(StopReason::DurationCap);
        }
        if seconds_between(clocks.last_motion_time, frame_time) >= timeout {
            return Some(StopReason::MotionTimeout);
        }
        if let Some(last_detection) = clocks.last_detection_time {
            if seconds_between(last_detection, frame_time) >= timeout {
                return Some(StopReason::DetectionInactivity);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: f64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_secs_f64(secs)
    }

    fn policy() -> StopPolicy {
        StopPolicy::new(Duration::from_secs(300), Duration::from_secs(15))
    }

    #[test]
    fn test_continuous_activity_stops_at_duration_cap() {
        let policy = policy();
        for step in 0..4000u32 {
            let t = step as f64 * 0.1;
            // Motion and detections on every frame
            let clocks = SessionClocks {
                start_time: at(0.0),
                last_motion_time: at(t),
                last_detection_time: Some(at(t)),
            };
            if let Some(reason) = policy.evaluate(&clocks, at(t)) {
                assert_eq!(reason, StopReason::DurationCap);
                assert!((t - 300.0).abs() <= 0.11);
                return;
            }
        }
        panic!("session never stopped");
    }

    #[test]
    fn test_no_motion_stops_at_motion_timeout() {
        let clocks = SessionClocks {
            start_time: at(0.0),
            last_motion_time: at(0.0),
            last_detection_time: Some(at(0.0)),
        };
        assert_eq!(policy().evaluate(&clocks, at(14.9)), None);
        assert_eq!(
            policy().evaluate(&clocks, at(15.0)),
            Some(StopReason::MotionTimeout)
        );
    }

    #[test]
    fn test_detection_inactivity_uses_independent_clock() {
        let clocks = SessionClocks {
            start_time: at(0.0),
            last_motion_time: at(20.0),
            last_detection_time: Some(at(5.0)),
        };
        assert_eq!(
            policy().evaluate(&clocks, at(20.0)),
            Some(StopReason::DetectionInactivity)
        );
    }

    #[test]
    fn test_recognition_disabled_skips_detection_clock() {
        let clocks = SessionClocks {
            start_time: at(0.0),
            last_motion_time: at(100.0),
            last_detection_time: None,
        };
        assert_eq!(policy().evaluate(&clocks, at(110.0)), None);
    }

    #[test]
    fn test_duration_cap_takes_priority() {
        let clocks = SessionClocks {
            start_time: at(0.0),
            last_motion_time: at(0.0),
            last_detection_time: Some(at(0.0)),
        };
        assert_eq!(
            policy().evaluate(&clocks, at(300.0)),
            Some(StopReason::DurationCap)
        );
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::MotionTimeout.to_string(), "motion timeout");
        assert_eq!(StopReason::SourceStalled.to_string(), "source stalled");
    }
}
