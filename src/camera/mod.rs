mod builder;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gstreamer;
mod interface;
mod mock;

pub use builder::FrameSourceBuilder;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gstreamer::GstFrameSource;
pub use interface::{CameraHandle, FrameSource, StreamLease};
pub use mock::MockFrameSource;
