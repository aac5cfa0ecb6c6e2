use super::types::COMPONENTS;
use super::{ComponentState, WatchpostOrchestrator};
use crate::error::Result;
use crate::events::{EventDispatcher, TriggerLifecycle};
use std::sync::Arc;
use tracing::{error, info, warn};

impl WatchpostOrchestrator {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing watchpost components");

        let mut states = self.component_states.lock().await;
        for component in COMPONENTS {
            let registered = match component {
                "sampler" => self.sampler.is_some(),
                "keyboard" => self.keyboard_enabled,
                _ => true,
            };
            if registered {
                states.insert(component.to_string(), ComponentState::Stopped);
            }
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start all components in dependency order
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting watchpost");

        // the store is opened with the engine; make sure it answers before anything fires
        self.set_component_state("store", ComponentState::Starting)
            .await;
        if let Err(e) = self.engine.store().recent_events(1) {
            error!("Event store is not usable: {}", e);
            self.set_component_state("store", ComponentState::Failed)
                .await;
            return Err(e);
        }
        self.engine.journal().record("System", "watchpost starting");
        self.set_component_state("store", ComponentState::Running)
            .await;

        // Arm triggers and start input watchers
        self.set_component_state("lifecycle", ComponentState::Starting)
            .await;
        let (report, task) =
            TriggerLifecycle::new(Arc::clone(&self.engine)).start(self.lifecycle_token.clone());
        if !report.rejected.is_empty() {
            warn!(
                "{} trigger(s) rejected: {}",
                report.rejected.len(),
                report
                    .rejected
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        self.arm_report = Some(report);
        self.lifecycle_task = Some(task);
        self.set_component_state("lifecycle", ComponentState::Running)
            .await;

        self.set_component_state("dispatcher", ComponentState::Starting)
            .await;
        let dispatcher = EventDispatcher::new(Arc::clone(&self.engine));
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run(self.dispatcher_token.clone())));
        self.set_component_state("dispatcher", ComponentState::Running)
            .await;

        if let Some(sampler) = self.sampler.as_mut() {
            self.component_states
                .lock()
                .await
                .insert("sampler".to_string(), ComponentState::Starting);
            let started = sampler.start();
            let state = if started.is_ok() {
                ComponentState::Running
            } else {
                ComponentState::Failed
            };
            self.set_component_state("sampler", state).await;
            started.map_err(|e| {
                error!("Failed to start motion sampler: {}", e);
                e
            })?;
            info!("Motion sampler started");
        }

        // Keyboard input for bench testing (only if enabled)
        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        info!("watchpost started successfully");
        Ok(())
    }
}
