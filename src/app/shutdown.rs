use super::{ComponentState, WatchpostOrchestrator};
use crate::error::{Result, WatchpostError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl WatchpostOrchestrator {
    /// Stop every component in reverse start order; returns the process exit code
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let system = &self.engine.config().system;
        let stop_timeout = system.stop_timeout();
        let drain_budget = system.drain_interval() * system.drain_retries;
        let mut exit_code = 0;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Stopping)
                    .await;
                let stopped = bounded(stop_timeout, "keyboard", keyboard_handler.stop()).await;
                exit_code |= self.settle("keyboard", stopped).await;
            }
        }

        if let Some(sampler) = self.sampler.as_mut() {
            self.component_states
                .lock()
                .await
                .insert("sampler".to_string(), ComponentState::Stopping);
            // the sampler bounds its own stop
            let stopped = if sampler.stop().await {
                Ok(())
            } else {
                Err(component_error("sampler", "stop timeout"))
            };
            exit_code |= self.settle("sampler", stopped).await;
        }

        self.set_component_state("dispatcher", ComponentState::Stopping)
            .await;
        self.dispatcher_token.cancel();
        let stopped = match self.dispatcher_task.take() {
            Some(task) => bounded(stop_timeout, "dispatcher", async move {
                task.await
                    .map_err(|e| component_error("dispatcher", &e.to_string()))?
            })
            .await,
            None => Ok(()),
        };
        exit_code |= self.settle("dispatcher", stopped).await;

        self.set_component_state("lifecycle", ComponentState::Stopping)
            .await;
        self.lifecycle_token.cancel();
        let stopped = match self.lifecycle_task.take() {
            Some(task) => bounded(stop_timeout + drain_budget, "lifecycle", async move {
                match task.await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(component_error("lifecycle", "action workers abandoned")),
                    Err(e) => Err(component_error("lifecycle", &e.to_string())),
                }
            })
            .await,
            None => Ok(()),
        };
        exit_code |= self.settle("lifecycle", stopped).await;

        self.set_component_state("store", ComponentState::Stopping)
            .await;
        let engine = &self.engine;
        let stopped = bounded(stop_timeout, "store", async {
            engine.registry().close_all().await;
            Ok(())
        })
        .await;
        self.engine.journal().record("System", "watchpost stopped");
        exit_code |= self.settle("store", stopped).await;

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Record how a component stop ended; non-zero when it failed
    async fn settle(&self, component: &str, stopped: Result<()>) -> i32 {
        match stopped {
            Ok(()) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                0
            }
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                1
            }
        }
    }
}

async fn bounded<F>(limit: Duration, component: &str, stop: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    timeout(limit, stop)
        .await
        .map_err(|_| component_error(component, "stop timeout"))?
}

fn component_error(component: &str, message: &str) -> WatchpostError {
    WatchpostError::Component {
        component: component.to_string(),
        message: message.to_string(),
    }
}
