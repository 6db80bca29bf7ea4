use super::orchestrator::{CAMERA, HTTP, PIPELINE};
use super::{ComponentState, WildcamOrchestrator};
use crate::error::{Result, WildcamError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const HTTP_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Covers finalizing an in-flight recording, including encoder EOS
const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(45);
const CAMERA_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl WildcamOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Reverse dependency order: the pipeline needs the camera until its session is finalized
        if let Err(e) = self.stop_http().await {
            error!("Error stopping http: {}", e);
            exit_code = 1;
        }

        if let Err(e) = self.stop_pipeline().await {
            error!("Error stopping pipeline: {}", e);
            exit_code = 1;
        }

        if let Err(e) = self.stop_camera().await {
            error!("Error stopping camera: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_http(&mut self) -> Result<()> {
        let Some(task) = self.http_task.take() else {
            return Ok(());
        };
        self.stop_component(HTTP, HTTP_STOP_TIMEOUT, async move {
            match task.await {
                Ok(served) => served,
                Err(e) => Err(WildcamError::component(HTTP, e.to_string())),
            }
        })
        .await
    }

    async fn stop_pipeline(&mut self) -> Result<()> {
        let Some(task) = self.supervisor_task.take() else {
            self.set_component_state(PIPELINE, ComponentState::Stopped)
                .await;
            return Ok(());
        };
        let report = self
            .stop_component(PIPELINE, PIPELINE_STOP_TIMEOUT, async move {
                match task.await {
                    Ok(report) => report,
                    Err(e) => Err(WildcamError::component(PIPELINE, e.to_string())),
                }
            })
            .await?;
        info!(
            "Pipeline recorded {} sessions ({} failed)",
            report.sessions_started, report.sessions_failed
        );
        Ok(())
    }

    async fn stop_camera(&mut self) -> Result<()> {
        let camera = self.camera.clone();
        self.stop_component(CAMERA, CAMERA_STOP_TIMEOUT, async move {
            camera.stop().await?;
            camera.close().await?;
            Ok::<(), WildcamError>(())
        })
        .await
    }

    /// Drive one component's stop future with a deadline, tracking its state
    async fn stop_component<T, F>(&self, component: &str, limit: Duration, stop: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, stop).await {
            Ok(Ok(value)) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(WildcamError::component(
                    component,
                    format!("stop timed out after {:?}", limit),
                ))
            }
        }
    }
}
