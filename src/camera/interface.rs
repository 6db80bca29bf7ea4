use crate::error::CameraError;
use crate::frame::{FrameData, StreamKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Camera hardware abstraction
///
/// Lifecycle calls are idempotent. `capture` must return promptly with either
/// a frame or an error; callers additionally bound it with a timeout.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn start(&self) -> Result<(), CameraError>;

    async fn stop(&self) -> Result<(), CameraError>;

    async fn close(&self) -> Result<(), CameraError>;

    async fn capture(&self, stream: StreamKind) -> Result<FrameData, CameraError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct LeaseTable {
    main: AtomicBool,
    lores: AtomicBool,
}

impl LeaseTable {
    fn flag(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Main => &self.main,
            StreamKind::Lores => &self.lores,
        }
    }
}

/// Shared camera with exclusive per-stream access
#[derive(Clone)]
pub struct CameraHandle {
    source: Arc<dyn FrameSource>,
    leases: Arc<LeaseTable>,
    capture_timeout: Duration,
}

impl CameraHandle {
    pub fn new(source: Arc<dyn FrameSource>, capture_timeout: Duration) -> Self {
        Self {
            source,
            leases: Arc::new(LeaseTable::default()),
            capture_timeout,
        }
    }

    /// Claim exclusive use of `stream` until the returned lease is dropped
    pub fn lease(&self, stream: StreamKind) -> Result<StreamLease, CameraError> {
        let flag = self.leases.flag(stream);
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CameraError::StreamBusy { stream });
        }

        debug!("Leased {} stream", stream);
        Ok(StreamLease {
            stream,
            source: Arc::clone(&self.source),
            leases: Arc::clone(&self.leases),
            capture_timeout: self.capture_timeout,
        })
    }

    pub fn is_leased(&self, stream: StreamKind) -> bool {
        self.leases.flag(stream).load(Ordering::Acquire)
    }

    pub async fn start(&self) -> Result<(), CameraError> {
        info!("Starting {} camera", self.source.name());
        self.source.start().await
    }

    pub async fn stop(&self) -> Result<(), CameraError> {
        info!("Stopping {} camera", self.source.name());
        self.source.stop().await
    }

    pub async fn close(&self) -> Result<(), CameraError> {
        self.source.close().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.source.name()
    }
}

/// Exclusive claim on one camera stream, released on drop
pub struct StreamLease {
    stream: StreamKind,
    source: Arc<dyn FrameSource>,
    leases: Arc<LeaseTable>,
    capture_timeout: Duration,
}

impl StreamLease {
    /// Capture one frame, failing if the source does not answer in time
    pub async fn capture(&self) -> Result<FrameData, CameraError> {
        match tokio::time::timeout(self.capture_timeout, self.source.capture(self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(CameraError::CaptureFailure {
                stream: self.stream,
                details: format!("no frame within {:?}", self.capture_timeout),
            }),
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.leases.flag(self.stream).store(false, Ordering::Release);
        debug!("Released {} stream", self.stream);
    }
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("stream", &self.stream)
            .finish()
    }
}
