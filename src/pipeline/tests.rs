use super::*;
use crate::camera::{CameraHandle, FrameSource};
use crate::catalog::VideoCatalog;
use crate::config::{MotionConfig, MotionMode};
use crate::error::CameraError;
use crate::frame::{FrameData, StreamKind};
use crate::recording::{
    test_settings, FrameAnnotator, MjpegFileSinkFactory, ProducerSettings, SessionContext,
    StopPolicy,
};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Camera with a virtual clock advancing 100ms per captured frame
#[derive(Default)]
struct ScriptedCamera {
    moving: AtomicBool,
    failing: AtomicBool,
    tick: AtomicU64,
}

impl ScriptedCamera {
    fn moving() -> Arc<Self> {
        let camera = Self::default();
        camera.moving.store(true, Ordering::SeqCst);
        Arc::new(camera)
    }
}

#[async_trait]
impl FrameSource for ScriptedCamera {
    async fn start(&self) -> Result<(), CameraError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), CameraError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), CameraError> {
        Ok(())
    }
    async fn capture(&self, stream: StreamKind) -> Result<FrameData, CameraError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailure {
                stream,
                details: "scripted failure".to_string(),
            });
        }
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let (width, height, size) = match stream {
            StreamKind::Main => (64, 48, 16),
            StreamKind::Lores => (32, 24, 8),
        };
        let mut image = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
        if self.moving.load(Ordering::SeqCst) {
            let (x0, y0) = if tick % 2 == 0 {
                (2, 2)
            } else {
                (width - size - 2, height - size - 2)
            };
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    image.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        let timestamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(tick * 100);
        Ok(FrameData::from_rgb(tick, timestamp, image, stream))
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    _dir: TempDir,
    camera: CameraHandle,
    catalog: Arc<VideoCatalog>,
    supervisor: PipelineSupervisor,
}

fn create_test_supervisor(source: Arc<ScriptedCamera>, duration_limit: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(VideoCatalog::open_in_memory().unwrap());
    let camera = CameraHandle::new(source, Duration::from_millis(500));

    let mut settings = test_settings(dir.path().join("videos"));
    settings.policy = StopPolicy::new(duration_limit, Duration::from_secs(15));
    let ctx = SessionContext {
        catalog: catalog.clone(),
        sinks: Arc::new(MjpegFileSinkFactory::default()),
        recognizer: None,
        annotator: Arc::new(FrameAnnotator::disabled()),
        motion: MotionConfig {
            mode: MotionMode::Normal,
            min_area: 10,
            blur_radius: 1,
            ..MotionConfig::default()
        },
        settings,
    };

    let supervisor_settings = SupervisorSettings {
        idle_poll_interval: Duration::from_millis(10),
        queue_capacity: 16,
        capture_retry_limit: 3,
        capture_retry_backoff: Duration::from_millis(10),
        idle_abort_backoff: Duration::from_millis(50),
        producer_join_timeout: Duration::from_secs(1),
        producer: ProducerSettings {
            frame_interval: Duration::from_millis(10),
            send_timeout: Duration::from_millis(50),
            retry_limit: 3,
            retry_backoff: Duration::from_millis(10),
        },
    };

    Harness {
        _dir: dir,
        camera: camera.clone(),
        catalog,
        supervisor: PipelineSupervisor::new(camera, ctx, supervisor_settings),
    }
}

/// Start time in Unix seconds with millisecond precision, read from the file name
fn precise_start(filename: &str) -> f64 {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .unwrap()
        .to_str()
        .unwrap();
    let parts: Vec<&str> = stem.rsplitn(4, '_').collect();
    let (millis, time, date) = (parts[0], parts[1], parts[2]);
    let date = chrono::NaiveDate::parse_from_str(date, "%Y%m%d").unwrap();
    let time = chrono::NaiveTime::parse_from_str(time, "%H%M%S").unwrap();
    let seconds = date.and_time(time).and_utc().timestamp();
    seconds as f64 + millis.parse::<u32>().unwrap() as f64 / 1000.0
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_sessions_never_overlap() {
    let harness = create_test_supervisor(ScriptedCamera::moving(), Duration::from_secs(1));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(harness.supervisor.run(shutdown.clone()));

    let catalog = harness.catalog.clone();
    wait_until(move || catalog.count().unwrap() >= 3).await;
    shutdown.cancel();
    let report = task.await.unwrap();

    assert!(report.sessions_started >= 3);
    assert_eq!(report.sessions_failed, 0);

    let entries = harness.catalog.list_all().unwrap();
    // A session cut by shutdown before its first frame leaves no row
    assert!(entries.len() >= 3 && entries.len() as u64 <= report.sessions_started);
    assert!(entries.iter().all(|e| e.finalized));

    let mut spans: Vec<(f64, f64)> = entries
        .iter()
        .map(|e| {
            let start = precise_start(&e.filename);
            (start, start + e.duration.unwrap())
        })
        .collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    for pair in spans.windows(2) {
        // Every capture has its own tick, so sessions never share a frame time
        assert!(pair[0].1 < pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
    assert!(!harness.camera.is_leased(StreamKind::Main));
    assert!(!harness.camera.is_leased(StreamKind::Lores));
}

#[tokio::test]
async fn test_state_transitions() {
    let harness = create_test_supervisor(ScriptedCamera::moving(), Duration::from_secs(1));
    let mut states = harness.supervisor.subscribe();
    assert_eq!(*states.borrow(), PipelineState::IdleWatch);

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(harness.supervisor.run(shutdown.clone()));

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == PipelineState::ActiveRecording),
    )
    .await
    .unwrap()
    .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == PipelineState::IdleWatch),
    )
    .await
    .unwrap()
    .unwrap();

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(*states.borrow(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_shutdown_finalizes_active_session() {
    let harness = create_test_supervisor(ScriptedCamera::moving(), Duration::from_secs(300));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(harness.supervisor.run(shutdown.clone()));

    let camera = harness.camera.clone();
    let catalog = harness.catalog.clone();
    wait_until(move || camera.is_leased(StreamKind::Main) && catalog.count().unwrap() == 1).await;
    shutdown.cancel();
    let report = task.await.unwrap();

    assert_eq!(report.sessions_started, 1);
    assert_eq!(report.sessions_completed, 1);
    let entries = harness.catalog.list_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].finalized);
    assert!(std::path::Path::new(&entries[0].filename).exists());
    assert!(!harness.camera.is_leased(StreamKind::Main));
}

#[tokio::test]
async fn test_static_scene_stays_idle() {
    let harness = create_test_supervisor(Arc::new(ScriptedCamera::default()), Duration::from_secs(1));
    let states = harness.supervisor.subscribe();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(harness.supervisor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*states.borrow(), PipelineState::IdleWatch);
    assert!(harness.camera.is_leased(StreamKind::Lores));
    shutdown.cancel();

    let report = task.await.unwrap();
    assert_eq!(report.sessions_started, 0);
    assert_eq!(harness.catalog.count().unwrap(), 0);
}

#[tokio::test]
async fn test_idle_capture_failures_are_survived() {
    let source = Arc::new(ScriptedCamera::default());
    source.failing.store(true, Ordering::SeqCst);
    let harness = create_test_supervisor(source.clone(), Duration::from_secs(1));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(harness.supervisor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    // Camera recovers with motion in view
    source.moving.store(true, Ordering::SeqCst);
    source.failing.store(false, Ordering::SeqCst);
    let catalog = harness.catalog.clone();
    wait_until(move || catalog.count().unwrap() >= 1).await;
    shutdown.cancel();

    let report = task.await.unwrap();
    assert!(report.idle_aborts >= 1);
    assert!(report.sessions_started >= 1);
}
