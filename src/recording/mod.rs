#[cfg(all(target_os = "linux", feature = "video_encoding"))]
mod encode;
mod overlay;
pub mod pacer;
pub mod policy;
mod producer;
mod session;
mod sink;

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
pub use encode::{GstSinkFactory, GstVideoSink};
pub use overlay::{resolve_timestamp_timezone, FrameAnnotator};
pub use pacer::{repeat_count, FramePacer};
pub use policy::{SessionClocks, StopPolicy, StopReason};
pub use producer::{run_producer, ProducerReport, ProducerSettings};
pub use session::{RecordingSession, SessionContext, SessionSettings, SessionSummary};
pub use sink::{sink_factory_for, MjpegFileSinkFactory, SinkFactory, VideoSink};

#[cfg(test)]
pub(crate) use session::test_settings;
