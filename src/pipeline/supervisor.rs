use super::state::{PipelineState, SupervisorReport};
use crate::analyzer::MotionDetector;
use crate::camera::{CameraHandle, StreamLease};
use crate::config::WildcamConfig;
use crate::error::{CameraError, PipelineError};
use crate::frame::{FrameData, StreamKind};
use crate::recording::{run_producer, ProducerSettings, RecordingSession, SessionContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PRODUCER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub idle_poll_interval: Duration,
    pub queue_capacity: usize,
    pub capture_retry_limit: u32,
    pub capture_retry_backoff: Duration,
    /// Pause after an idle phase gives up on the camera
    pub idle_abort_backoff: Duration,
    pub producer_join_timeout: Duration,
    pub producer: ProducerSettings,
}

impl SupervisorSettings {
    pub fn from_config(config: &WildcamConfig) -> Self {
        let recording = &config.recording;
        let backoff = Duration::from_millis(recording.capture_retry_backoff_ms);
        Self {
            idle_poll_interval: Duration::from_millis(recording.idle_poll_interval_ms),
            queue_capacity: recording.queue_capacity.max(1),
            capture_retry_limit: recording.capture_retry_limit.max(1),
            capture_retry_backoff: backoff,
            idle_abort_backoff: backoff * recording.capture_retry_limit.max(1),
            producer_join_timeout: PRODUCER_JOIN_TIMEOUT,
            producer: ProducerSettings::from_config(recording),
        }
    }
}

enum IdleOutcome {
    Triggered,
    Shutdown,
}

/// Alternates between watching the low-res stream and recording sessions
///
/// Exactly one session exists at a time: the supervisor waits for the session
/// and its producer to be torn down before it polls for motion again.
pub struct PipelineSupervisor {
    camera: CameraHandle,
    ctx: SessionContext,
    settings: SupervisorSettings,
    state: watch::Sender<PipelineState>,
    report: SupervisorReport,
}

impl PipelineSupervisor {
    pub fn new(camera: CameraHandle, ctx: SessionContext, settings: SupervisorSettings) -> Self {
        let (state, _) = watch::channel(PipelineState::IdleWatch);
        Self {
            camera,
            ctx,
            settings,
            state,
            report: SupervisorReport::default(),
        }
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> SupervisorReport {
        info!(
            "Pipeline supervisor started ({} camera, poll every {:?})",
            self.camera.backend_name(),
            self.settings.idle_poll_interval
        );
        let detector = Arc::new(Mutex::new(MotionDetector::new(self.ctx.motion.clone())));

        while !shutdown.is_cancelled() {
            self.set_state(PipelineState::IdleWatch);
            match self.watch_idle(&detector, &shutdown).await {
                IdleOutcome::Triggered => {
                    self.record(&shutdown).await;
                    detector.lock().reset();
                }
                IdleOutcome::Shutdown => break,
            }
        }

        self.set_state(PipelineState::Stopped);
        info!(
            "Pipeline supervisor stopped: {} sessions ({} completed, {} failed), {} idle aborts",
            self.report.sessions_started,
            self.report.sessions_completed,
            self.report.sessions_failed,
            self.report.idle_aborts
        );
        self.report
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Pipeline state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Poll the low-res stream until motion or shutdown
    async fn watch_idle(
        &mut self,
        detector: &Arc<Mutex<MotionDetector>>,
        shutdown: &CancellationToken,
    ) -> IdleOutcome {
        let Some(lease) = self.acquire(StreamKind::Lores, shutdown).await else {
            return IdleOutcome::Shutdown;
        };
        let mut failures: u32 = 0;

        loop {
            let captured = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return IdleOutcome::Shutdown,
                result = lease.capture() => result,
            };

            let pause = match captured {
                Ok(frame) => {
                    failures = 0;
                    let id = frame.id;
                    if motion_in(detector, frame).await {
                        info!("Motion detected on lores frame {}, starting recording", id);
                        return IdleOutcome::Triggered;
                    }
                    self.settings.idle_poll_interval
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Idle capture failed ({}/{}): {}",
                        failures, self.settings.capture_retry_limit, e
                    );
                    if failures >= self.settings.capture_retry_limit {
                        error!(
                            "{}",
                            PipelineError::CaptureAborted {
                                stream: StreamKind::Lores,
                                failures,
                            }
                        );
                        self.report.idle_aborts += 1;
                        detector.lock().reset();
                        failures = 0;
                        self.settings.idle_abort_backoff
                    } else {
                        self.settings.capture_retry_backoff
                    }
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return IdleOutcome::Shutdown,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Lease `stream`, waiting out a busy stream until shutdown
    async fn acquire(
        &self,
        stream: StreamKind,
        shutdown: &CancellationToken,
    ) -> Option<StreamLease> {
        loop {
            match self.camera.lease(stream) {
                Ok(lease) => return Some(lease),
                Err(e @ CameraError::StreamBusy { .. }) => debug!("{}; retrying", e),
                Err(e) => warn!("Cannot lease {} stream: {}", stream, e),
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.capture_retry_backoff) => {}
            }
        }
    }

    /// One active phase: producer and session joined by a bounded queue
    async fn record(&mut self, shutdown: &CancellationToken) {
        let Some(lease) = self.acquire(StreamKind::Main, shutdown).await else {
            return;
        };
        self.report.sessions_started += 1;
        let number = self.report.sessions_started;
        self.set_state(PipelineState::ActiveRecording);

        let token = shutdown.child_token();
        let (tx, rx) = mpsc::channel::<FrameData>(self.settings.queue_capacity);

        let mut producer = tokio::spawn(run_producer(
            lease,
            tx,
            token.clone(),
            self.settings.producer.clone(),
        ));
        let session = tokio::spawn(
            RecordingSession::new(number, self.ctx.clone()).run(rx, token.clone()),
        );

        let outcome = session.await;
        token.cancel();

        match tokio::time::timeout(self.settings.producer_join_timeout, &mut producer).await {
            Ok(Ok(report)) => debug!(
                "Session {} producer joined: {} sent, {} dropped",
                number, report.frames_sent, report.frames_dropped
            ),
            Ok(Err(e)) => error!("Session {} producer task failed: {}", number, e),
            Err(_) => {
                warn!(
                    "Session {} producer did not stop within {:?}, aborting it",
                    number, self.settings.producer_join_timeout
                );
                producer.abort();
            }
        }

        match outcome {
            Ok(Ok(summary)) => {
                self.report.sessions_completed += 1;
                debug!("Session {} ended: {}", number, summary.reason);
            }
            Ok(Err(e)) => {
                self.report.sessions_failed += 1;
                error!("Session {} failed: {}", number, e);
            }
            Err(e) => {
                self.report.sessions_failed += 1;
                error!("Session {} task failed: {}", number, e);
            }
        }
    }
}

/// Run the idle detector on the blocking pool
async fn motion_in(detector: &Arc<Mutex<MotionDetector>>, frame: FrameData) -> bool {
    let detector = Arc::clone(detector);
    match tokio::task::spawn_blocking(move || detector.lock().detect(&frame)).await {
        Ok(Ok(motion)) => motion,
        Ok(Err(e)) => {
            warn!("Idle motion detection failed: {}", e);
            false
        }
        Err(e) => {
            error!("Idle motion detection task failed: {}", e);
            false
        }
    }
}
