use super::{ShutdownReason, WatchpostOrchestrator};
use crate::error::{Result, WatchpostError};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

impl WatchpostOrchestrator {
    /// Run until a signal or a shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("watchpost is running");

        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| WatchpostError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers(self.shutdown_sender.clone());

        // the orchestrator holds a sender itself, so recv only yields None if that is gone
        let shutdown_reason = shutdown_receiver
            .recv()
            .await
            .ok_or_else(|| WatchpostError::System {
                message: "Shutdown channel closed unexpectedly".to_string(),
            })?;

        info!("Shutdown initiated: {:?}", shutdown_reason);
        if let ShutdownReason::Error(message) = &shutdown_reason {
            self.engine.journal().record("System", &format!("fatal: {}", message));
        }

        let exit_code = self.shutdown().await?;

        info!("watchpost shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: mpsc::Sender<ShutdownReason>) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let sender = shutdown_sender.clone();
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    let _ = sender
                        .send(ShutdownReason::Signal("SIGTERM".to_string()))
                        .await;
                }
            });
        }

        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                let _ = shutdown_sender
                    .send(ShutdownReason::Signal("SIGINT".to_string()))
                    .await;
            }
        });
    }
}
