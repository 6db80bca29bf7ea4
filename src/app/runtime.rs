use super::types::ShutdownNotifier;
use super::{ShutdownReason, WildcamOrchestrator};
use crate::error::{Result, WildcamError};
use tokio::signal;
use tracing::{error, info};

impl WildcamOrchestrator {
    /// Run until a shutdown signal, then stop everything
    pub async fn run(&mut self) -> Result<i32> {
        info!("Wildcam is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| WildcamError::system("Shutdown receiver already taken"))?;

        Self::setup_signal_handlers(self.shutdown_notifier.clone());

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| WildcamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = exit_code.max(1);
        }

        info!("Wildcam shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(notifier: ShutdownNotifier) {
        #[cfg(unix)]
        {
            let notifier_sigterm = notifier.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    notifier_sigterm
                        .notify(ShutdownReason::Signal("SIGTERM".to_string()))
                        .await;
                }
            });
        }

        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                notifier
                    .notify(ShutdownReason::Signal("SIGINT".to_string()))
                    .await;
            }
        });
    }
}
