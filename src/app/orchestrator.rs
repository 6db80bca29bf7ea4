use super::state::ComponentStates;
use super::types::{ShutdownNotifier, ShutdownReason};
use crate::camera::{CameraHandle, FrameSourceBuilder};
use crate::catalog::VideoCatalog;
use crate::config::WildcamConfig;
use crate::error::Result;
use crate::pipeline::{PipelineState, PipelineSupervisor, SupervisorReport, SupervisorSettings};
use crate::recognition::{DetectorBackend, FilteredRecognizer, LabelFilter, Recognizer};
use crate::recording::{sink_factory_for, FrameAnnotator, SessionContext, SessionSettings};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(super) const CAMERA: &str = "camera";
pub(super) const PIPELINE: &str = "pipeline";
pub(super) const HTTP: &str = "http";

/// Main application coordinator that manages all system components
pub struct WildcamOrchestrator {
    pub(super) config: WildcamConfig,
    pub(super) camera: CameraHandle,
    pub(super) catalog: Arc<VideoCatalog>,

    // Components
    pub(super) supervisor: Option<PipelineSupervisor>,
    pub(super) pipeline_state: watch::Receiver<PipelineState>,
    pub(super) supervisor_task: Option<JoinHandle<Result<SupervisorReport>>>,
    pub(super) http_task: Option<JoinHandle<Result<()>>>,

    // Lifecycle management
    pub(super) component_states: ComponentStates,
    pub(super) shutdown_notifier: ShutdownNotifier,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl WildcamOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub async fn new(config: WildcamConfig) -> Result<Self> {
        Self::with_detector(config, None).await
    }

    /// Create an orchestrator with an object detector for recognition
    ///
    /// The backend is wrapped in the configured threshold and keyword filter.
    /// It is ignored unless `recognition.enabled` is set.
    pub async fn with_detector(
        config: WildcamConfig,
        detector: Option<Box<dyn DetectorBackend>>,
    ) -> Result<Self> {
        let camera = FrameSourceBuilder::new().config(config.camera.clone()).build()?;

        let catalog = Arc::new(VideoCatalog::open(&config.catalog.path)?);
        info!(
            "Video catalog {} opened with {} recordings",
            config.catalog.path,
            catalog.count()?
        );

        let sinks = sink_factory_for(&config.recording)?;
        let recognizer = Self::build_recognizer(&config, detector);

        let ctx = SessionContext {
            catalog: Arc::clone(&catalog),
            sinks,
            recognizer,
            annotator: Arc::new(FrameAnnotator::from_config(&config.recording)),
            motion: config.motion.clone(),
            settings: SessionSettings::from_config(&config),
        };

        let supervisor = PipelineSupervisor::new(
            camera.clone(),
            ctx,
            SupervisorSettings::from_config(&config),
        );
        let pipeline_state = supervisor.subscribe();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            camera,
            catalog,
            supervisor: Some(supervisor),
            pipeline_state,
            supervisor_task: None,
            http_task: None,
            component_states: ComponentStates::default(),
            shutdown_notifier: ShutdownNotifier::new(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub(super) fn build_recognizer(
        config: &WildcamConfig,
        detector: Option<Box<dyn DetectorBackend>>,
    ) -> Option<Arc<dyn Recognizer>> {
        match (config.recognition.enabled, detector) {
            (true, Some(backend)) => {
                let recognizer =
                    FilteredRecognizer::new(backend, LabelFilter::from_config(&config.recognition));
                info!(
                    "Recognition enabled with {} backend (threshold {}, keywords {:?})",
                    recognizer.backend_name(),
                    config.recognition.threshold,
                    config.recognition.keywords
                );
                Some(Arc::new(recognizer))
            }
            (true, None) => {
                warn!("Recognition enabled but no detector backend is available; recording on motion only");
                None
            }
            (false, Some(backend)) => {
                info!(
                    "Recognition disabled; ignoring {} backend",
                    backend.name()
                );
                None
            }
            (false, None) => None,
        }
    }

    pub fn catalog(&self) -> Arc<VideoCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn pipeline_state(&self) -> PipelineState {
        *self.pipeline_state.borrow()
    }

    pub(super) fn http_enabled(&self) -> bool {
        cfg!(feature = "http") && self.config.http.enabled
    }
}
