use super::overlay::{resolve_timestamp_timezone, FrameAnnotator};
use super::pacer::FramePacer;
use super::policy::{SessionClocks, StopPolicy, StopReason};
use super::sink::{SinkFactory, VideoSink};
use crate::analyzer::MotionDetector;
use crate::catalog::VideoCatalog;
use crate::config::{MotionConfig, WildcamConfig};
use crate::error::{PipelineError, SinkError};
use crate::frame::{seconds_between, FrameData};
use crate::recognition::{Detection, Recognizer};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tunables for recording sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub video_folder: PathBuf,
    pub target_framerate: f64,
    pub motion_stride: u32,
    pub recognition_stride: u32,
    pub policy: StopPolicy,
    pub poll_interval: Duration,
    pub starvation_timeout: Duration,
    /// Frame-time seconds between catalog duration updates
    pub duration_update_interval: f64,
    pub timezone: Tz,
}

impl SessionSettings {
    pub fn from_config(config: &WildcamConfig) -> Self {
        let recording = &config.recording;
        Self {
            video_folder: PathBuf::from(&recording.video_folder),
            target_framerate: recording.target_framerate,
            motion_stride: recording.motion_stride.max(1),
            recognition_stride: config.recognition.stride.max(1),
            policy: StopPolicy::new(recording.duration_limit(), recording.motion_timeout()),
            poll_interval: Duration::from_millis(recording.poll_interval_ms),
            starvation_timeout: Duration::from_secs_f64(recording.starvation_timeout_secs),
            duration_update_interval: recording.duration_update_interval_secs,
            timezone: resolve_timestamp_timezone(&recording.timestamp_timezone),
        }
    }
}

/// Collaborators shared by every session the supervisor starts
#[derive(Clone)]
pub struct SessionContext {
    pub catalog: Arc<VideoCatalog>,
    pub sinks: Arc<dyn SinkFactory>,
    /// `None` disables recognition and the detection-inactivity stop
    pub recognizer: Option<Arc<dyn Recognizer>>,
    pub annotator: Arc<FrameAnnotator>,
    pub motion: MotionConfig,
    pub settings: SessionSettings,
}

/// What a finished session produced
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: u64,
    pub reason: StopReason,
    pub catalog_id: Option<String>,
    pub path: Option<PathBuf>,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub duration_secs: f64,
    pub frames_processed: u64,
    pub frames_written: u64,
    pub labels: BTreeSet<String>,
    pub avg_motion_ms: Option<f64>,
    pub avg_recognition_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct StageTimer {
    total: Duration,
    runs: u32,
}

impl StageTimer {
    fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.runs += 1;
    }

    fn average_ms(&self) -> Option<f64> {
        (self.runs > 0).then(|| self.total.as_secs_f64() * 1000.0 / self.runs as f64)
    }
}

/// State that exists once the first frame has arrived
struct ActiveRecording {
    catalog_id: Option<String>,
    path: PathBuf,
    start_time: SystemTime,
    last_motion_time: SystemTime,
    last_detection_time: Option<SystemTime>,
    last_frame_time: SystemTime,
    last_duration_update: f64,
}

/// What the blocking half of a frame produced
#[derive(Debug, Default)]
struct FrameOutcome {
    motion: bool,
    motion_elapsed: Option<Duration>,
    /// Set when the recognizer ran successfully on this frame
    detections: Option<Vec<Detection>>,
    recognition_elapsed: Option<Duration>,
    repeats: u32,
}

/// Detector, recognizer, overlay and encoder work for one session
///
/// Everything here is CPU or encoder bound and runs on the blocking pool,
/// one frame at a time.
struct FrameStage {
    session: u64,
    detector: MotionDetector,
    pacer: FramePacer,
    recognizer: Option<Arc<dyn Recognizer>>,
    annotator: Arc<FrameAnnotator>,
    detections: Vec<Detection>,
    sink: Option<Box<dyn VideoSink>>,
    motion_stride: u64,
    recognition_stride: u64,
}

impl FrameStage {
    fn new(session: u64, ctx: &SessionContext) -> Self {
        Self {
            session,
            detector: MotionDetector::new(ctx.motion.clone()),
            pacer: FramePacer::new(ctx.settings.target_framerate),
            recognizer: ctx.recognizer.clone(),
            annotator: Arc::clone(&ctx.annotator),
            detections: Vec::new(),
            sink: None,
            motion_stride: ctx.settings.motion_stride.max(1) as u64,
            recognition_stride: ctx.settings.recognition_stride.max(1) as u64,
        }
    }

    fn process(&mut self, frame: &FrameData, index: u64) -> Result<FrameOutcome, SinkError> {
        let mut outcome = FrameOutcome::default();

        if index % self.motion_stride == 0 {
            let started = std::time::Instant::now();
            match self.detector.detect(frame) {
                Ok(motion) => outcome.motion = motion,
                Err(e) => warn!("Session {}: motion detection failed: {}", self.session, e),
            }
            outcome.motion_elapsed = Some(started.elapsed());
        }

        if let Some(recognizer) = &self.recognizer {
            if index % self.recognition_stride == 0 {
                let started = std::time::Instant::now();
                match recognizer.recognize(frame) {
                    Ok(detections) => {
                        self.detections = detections.clone();
                        outcome.detections = Some(detections);
                    }
                    Err(e) => warn!("Session {}: recognition failed: {}", self.session, e),
                }
                outcome.recognition_elapsed = Some(started.elapsed());
            }
        }

        let Some(sink) = self.sink.as_mut() else {
            return Ok(outcome);
        };
        match frame.to_rgb_image() {
            Ok(mut image) => {
                self.annotator
                    .annotate(&mut image, &self.detections, frame.timestamp);
                let repeats = self.pacer.pace(frame.timestamp);
                sink.write(&image, repeats)?;
                outcome.repeats = repeats;
            }
            Err(e) => warn!(
                "Session {}: skipping undecodable frame {}: {}",
                self.session, frame.id, e
            ),
        }
        Ok(outcome)
    }
}

/// One triggered recording: consumes frames, writes video, owns its catalog row
pub struct RecordingSession {
    number: u64,
    ctx: SessionContext,
    stage: Arc<Mutex<FrameStage>>,
    labels: BTreeSet<String>,
    active: Option<ActiveRecording>,
    frames_processed: u64,
    frames_written: u64,
    motion_timer: StageTimer,
    recognition_timer: StageTimer,
}

impl RecordingSession {
    pub fn new(number: u64, ctx: SessionContext) -> Self {
        let stage = Arc::new(Mutex::new(FrameStage::new(number, &ctx)));
        Self {
            number,
            ctx,
            stage,
            labels: BTreeSet::new(),
            active: None,
            frames_processed: 0,
            frames_written: 0,
            motion_timer: StageTimer::default(),
            recognition_timer: StageTimer::default(),
        }
    }

    /// Consume frames until a stop condition fires, then finalize
    ///
    /// `token` is the active-phase token. The session cancels it as soon as
    /// it decides to stop so the producer halts; an external cancellation is
    /// reported as [`StopReason::Shutdown`].
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<FrameData>,
        token: CancellationToken,
    ) -> Result<SessionSummary, PipelineError> {
        info!("Recording session {} started", self.number);
        let mut last_frame_at = Instant::now();

        let reason = loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => break StopReason::Shutdown,
                result = tokio::time::timeout(self.ctx.settings.poll_interval, rx.recv()) => result,
            };

            match received {
                Ok(Some(frame)) => {
                    last_frame_at = Instant::now();
                    match self.handle_frame(frame).await {
                        Ok(Some(reason)) => break reason,
                        Ok(None) => {}
                        Err(e) => {
                            token.cancel();
                            return Err(self.abort(e).await);
                        }
                    }
                }
                Ok(None) => break StopReason::SourceEnded,
                Err(_) => {
                    if last_frame_at.elapsed() >= self.ctx.settings.starvation_timeout {
                        break StopReason::SourceStalled;
                    }
                }
            }
        };

        token.cancel();
        drop(rx);
        self.finish(reason).await
    }

    async fn handle_frame(&mut self, frame: FrameData) -> Result<Option<StopReason>, SinkError> {
        if self.active.is_none() {
            self.begin(&frame).await?;
        }
        self.process_frame(frame).await
    }

    /// Open the sink and catalog row using the first frame's time and size
    async fn begin(&mut self, frame: &FrameData) -> Result<(), SinkError> {
        let settings = &self.ctx.settings;
        tokio::fs::create_dir_all(&settings.video_folder)
            .await
            .map_err(|e| SinkError::Open {
                path: settings.video_folder.display().to_string(),
                details: e.to_string(),
            })?;

        let local = DateTime::<Utc>::from(frame.timestamp).with_timezone(&settings.timezone);
        let filename = format!(
            "animal_recording_{}.{}",
            local.format("%Y%m%d_%H%M%S_%3f"),
            self.ctx.sinks.file_extension()
        );
        let path = settings.video_folder.join(filename);

        // Encoder pipelines can block while they reach the playing state
        let sinks = Arc::clone(&self.ctx.sinks);
        let open_path = path.clone();
        let framerate = settings.target_framerate;
        let resolution = (frame.width, frame.height);
        let sink = tokio::task::spawn_blocking(move || sinks.open(&open_path, framerate, resolution))
            .await
            .map_err(|e| SinkError::Open {
                path: path.display().to_string(),
                details: format!("open task failed: {}", e),
            })??;
        self.stage.lock().sink = Some(sink);

        let catalog_id = match self.ctx.catalog.insert(
            &path.to_string_lossy(),
            frame.unix_seconds().floor() as i64,
            Vec::<String>::new(),
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    "Session {}: catalog insert failed, recording without a row: {}",
                    self.number, e
                );
                None
            }
        };

        info!(
            "Session {} recording to {} ({}x{}, catalog id {})",
            self.number,
            path.display(),
            frame.width,
            frame.height,
            catalog_id.as_deref().unwrap_or("none")
        );

        self.active = Some(ActiveRecording {
            catalog_id,
            path,
            start_time: frame.timestamp,
            last_motion_time: frame.timestamp,
            last_detection_time: self.ctx.recognizer.as_ref().map(|_| frame.timestamp),
            last_frame_time: frame.timestamp,
            last_duration_update: 0.0,
        });
        Ok(())
    }

    async fn process_frame(&mut self, frame: FrameData) -> Result<Option<StopReason>, SinkError> {
        if self.active.is_none() {
            return Ok(None);
        }
        let index = self.frames_processed;
        self.frames_processed += 1;
        let timestamp = frame.timestamp;

        let stage = Arc::clone(&self.stage);
        let outcome = tokio::task::spawn_blocking(move || stage.lock().process(&frame, index))
            .await
            .map_err(|e| SinkError::WriteFailure {
                details: format!("frame task failed: {}", e),
            })??;

        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        let settings = &self.ctx.settings;

        if let Some(elapsed) = outcome.motion_elapsed {
            self.motion_timer.record(elapsed);
        }
        if outcome.motion {
            active.last_motion_time = timestamp;
        }

        if let Some(elapsed) = outcome.recognition_elapsed {
            self.recognition_timer.record(elapsed);
        }
        if let Some(detections) = outcome.detections.filter(|d| !d.is_empty()) {
            active.last_detection_time = Some(timestamp);
            let before = self.labels.len();
            self.labels
                .extend(detections.into_iter().map(|d| d.label));
            if self.labels.len() > before {
                info!("Session {} labels: {:?}", self.number, self.labels);
                if let Some(id) = &active.catalog_id {
                    if let Err(e) = self.ctx.catalog.update_labels(id, &self.labels) {
                        warn!("Session {}: label update failed: {}", self.number, e);
                    }
                }
            }
        }

        self.frames_written += outcome.repeats as u64;
        active.last_frame_time = timestamp;

        let elapsed = seconds_between(active.start_time, timestamp);
        if elapsed - active.last_duration_update >= settings.duration_update_interval {
            active.last_duration_update = elapsed;
            if let Some(id) = &active.catalog_id {
                if let Err(e) = self.ctx.catalog.update_duration(id, elapsed) {
                    warn!("Session {}: duration update failed: {}", self.number, e);
                }
            }
        }

        let clocks = SessionClocks {
            start_time: active.start_time,
            last_motion_time: active.last_motion_time,
            last_detection_time: active.last_detection_time,
        };
        Ok(settings.policy.evaluate(&clocks, timestamp))
    }

    async fn finish(mut self, reason: StopReason) -> Result<SessionSummary, PipelineError> {
        info!("Session {} stopping: {}", self.number, reason);

        let mut summary = self.summary(reason);
        let sink = self.release_stage();
        if let Some(active) = self.active.take() {
            let closed = match sink {
                Some(sink) => close_sink(sink).await,
                None => Ok(()),
            };
            Self::finalize_row(self.number, &self.ctx.catalog, &active.catalog_id, summary.duration_secs);
            if let Err(e) = closed {
                return Err(PipelineError::SessionFailed {
                    details: format!("closing {}: {}", active.path.display(), e),
                });
            }
            summary.path = Some(active.path);
        }

        info!(
            "Session {} finished ({}): {:.1}s, {} frames processed, {} written, labels {:?}, avg motion {}, avg recognition {}",
            summary.session,
            summary.reason,
            summary.duration_secs,
            summary.frames_processed,
            summary.frames_written,
            summary.labels,
            format_ms(summary.avg_motion_ms),
            format_ms(summary.avg_recognition_ms)
        );
        Ok(summary)
    }

    /// Sink failure: release the sink, freeze the row and report the error
    async fn abort(mut self, cause: SinkError) -> PipelineError {
        error!("Session {} sink failure: {}", self.number, cause);
        let duration = self.summary(StopReason::SourceEnded).duration_secs;
        if let Some(sink) = self.release_stage() {
            if let Err(e) = close_sink(sink).await {
                warn!("Session {}: closing failed sink: {}", self.number, e);
            }
        }
        if let Some(active) = self.active.take() {
            Self::finalize_row(self.number, &self.ctx.catalog, &active.catalog_id, duration);
        }
        PipelineError::SessionFailed {
            details: cause.to_string(),
        }
    }

    /// Reset the detector and hand back the sink, if one was opened
    fn release_stage(&self) -> Option<Box<dyn VideoSink>> {
        let mut stage = self.stage.lock();
        stage.detector.reset();
        stage.detections.clear();
        stage.sink.take()
    }

    fn finalize_row(number: u64, catalog: &VideoCatalog, id: &Option<String>, duration: f64) {
        if let Some(id) = id {
            if let Err(e) = catalog.finalize(id, duration) {
                error!("Session {}: catalog finalize failed: {}", number, e);
            }
        }
    }

    fn summary(&self, reason: StopReason) -> SessionSummary {
        let (catalog_id, start_time, end_time, duration_secs) = match &self.active {
            Some(active) => (
                active.catalog_id.clone(),
                Some(active.start_time),
                Some(active.last_frame_time),
                seconds_between(active.start_time, active.last_frame_time).max(0.0),
            ),
            None => (None, None, None, 0.0),
        };
        SessionSummary {
            session: self.number,
            reason,
            catalog_id,
            path: None,
            start_time,
            end_time,
            duration_secs,
            frames_processed: self.frames_processed,
            frames_written: self.frames_written,
            labels: self.labels.clone(),
            avg_motion_ms: self.motion_timer.average_ms(),
            avg_recognition_ms: self.recognition_timer.average_ms(),
        }
    }
}

async fn close_sink(sink: Box<dyn VideoSink>) -> Result<(), SinkError> {
    let path = sink.path().display().to_string();
    match tokio::task::spawn_blocking(move || sink.close()).await {
        Ok(result) => result,
        Err(e) => Err(SinkError::Finalize {
            details: format!("close task for {} failed: {}", path, e),
        }),
    }
}

fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{:.2}ms", ms),
        None => "n/a".to_string(),
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("number", &self.number)
            .field("frames_processed", &self.frames_processed)
            .field("frames_written", &self.frames_written)
            .field("labels", &self.labels)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_settings(video_folder: PathBuf) -> SessionSettings {
    SessionSettings {
        video_folder,
        target_framerate: 10.0,
        motion_stride: 1,
        recognition_stride: 1,
        policy: StopPolicy::new(Duration::from_secs(300), Duration::from_secs(15)),
        poll_interval: Duration::from_millis(100),
        starvation_timeout: Duration::from_secs(2),
        duration_update_interval: 5.0,
        timezone: chrono_tz::UTC,
    }
}
