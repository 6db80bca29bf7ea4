use super::orchestrator::{CAMERA, HTTP, PIPELINE};
use super::state::{record_state, ComponentStates};
use super::types::{ShutdownNotifier, ShutdownReason};
use super::{ComponentState, WildcamOrchestrator};
use crate::error::{Result, WildcamError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[cfg(feature = "http")]
type PendingHttp = crate::http::BoundCatalogServer;
#[cfg(not(feature = "http"))]
type PendingHttp = std::convert::Infallible;

impl WildcamOrchestrator {
    /// Register all system components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing wildcam components");

        let mut states = self.component_states.lock().await;
        states.insert(CAMERA.to_string(), ComponentState::Stopped);
        states.insert(PIPELINE.to_string(), ComponentState::Stopped);
        if self.http_enabled() {
            states.insert(HTTP.to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start the camera, the pipeline supervisor and the catalog server
    ///
    /// The HTTP address is claimed first so a busy port fails startup
    /// before any recording can begin.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting wildcam");

        if self.supervisor.is_none() {
            return Err(WildcamError::component(PIPELINE, "supervisor already started"));
        }

        let http = if self.http_enabled() {
            self.bind_http().await?
        } else {
            None
        };

        self.set_component_state(CAMERA, ComponentState::Starting)
            .await;
        if let Err(e) = self.camera.start().await {
            error!("Failed to start camera: {}", e);
            self.set_component_state(CAMERA, ComponentState::Failed)
                .await;
            return Err(e.into());
        }
        self.set_component_state(CAMERA, ComponentState::Running)
            .await;
        info!("Camera ({}) started", self.camera.backend_name());

        let supervisor = self
            .supervisor
            .take()
            .ok_or_else(|| WildcamError::component(PIPELINE, "supervisor already started"))?;
        self.set_component_state(PIPELINE, ComponentState::Starting)
            .await;
        let token = self.cancellation_token.child_token();
        let task = tokio::spawn({
            let token = token.clone();
            async move { Ok(supervisor.run(token).await) }
        });
        self.supervisor_task = Some(watch_component(
            PIPELINE,
            task,
            token,
            self.shutdown_notifier.clone(),
            self.component_states.clone(),
        ));
        self.set_component_state(PIPELINE, ComponentState::Running)
            .await;
        info!("Pipeline supervisor started");

        if let Some(server) = http {
            self.spawn_http(server).await;
        }

        info!("Wildcam started successfully");
        Ok(())
    }

    #[cfg(feature = "http")]
    async fn bind_http(&mut self) -> Result<Option<PendingHttp>> {
        use crate::http::CatalogServer;

        self.set_component_state(HTTP, ComponentState::Starting)
            .await;
        let server = CatalogServer::new(
            self.config.http.clone(),
            self.catalog(),
            self.pipeline_state.clone(),
        );
        match server.bind().await {
            Ok(bound) => Ok(Some(bound)),
            Err(e) => {
                error!("Catalog server cannot start: {}", e);
                self.set_component_state(HTTP, ComponentState::Failed)
                    .await;
                Err(e.into())
            }
        }
    }

    #[cfg(not(feature = "http"))]
    async fn bind_http(&mut self) -> Result<Option<PendingHttp>> {
        Ok(None)
    }

    #[cfg(feature = "http")]
    async fn spawn_http(&mut self, server: PendingHttp) {
        let token = self.cancellation_token.child_token();
        let task = tokio::spawn({
            let token = token.clone();
            async move { server.serve(token).await.map_err(WildcamError::from) }
        });
        self.http_task = Some(watch_component(
            HTTP,
            task,
            token,
            self.shutdown_notifier.clone(),
            self.component_states.clone(),
        ));
        self.set_component_state(HTTP, ComponentState::Running)
            .await;
        info!(
            "Catalog server started on {}:{}",
            self.config.http.ip, self.config.http.port
        );
    }

    #[cfg(not(feature = "http"))]
    async fn spawn_http(&mut self, server: PendingHttp) {
        match server {}
    }
}

/// Follow a component task and request shutdown if it ends on its own
///
/// Ending on its own means failing, panicking, or returning before `token`
/// was cancelled.
pub(super) fn watch_component<T: Send + 'static>(
    component: &'static str,
    task: JoinHandle<Result<T>>,
    token: CancellationToken,
    notifier: ShutdownNotifier,
    states: ComponentStates,
) -> JoinHandle<Result<T>> {
    tokio::spawn(async move {
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(WildcamError::component(component, format!("task failed: {}", e))),
        };

        let failure = match &outcome {
            Err(e) => Some(e.to_string()),
            Ok(_) if !token.is_cancelled() => Some("exited unexpectedly".to_string()),
            Ok(_) => None,
        };
        if let Some(details) = failure {
            error!("{} component stopped on its own: {}", component, details);
            record_state(&states, component, ComponentState::Failed).await;
            notifier
                .notify(ShutdownReason::Error(format!("{}: {}", component, details)))
                .await;
        }
        outcome
    })
}
