mod motion;

pub use motion::{AppliedMode, MotionDetector};
