use super::types::{ComponentState, ShutdownReason};
use crate::actions::{ActionOutcome, ActionRunner};
use crate::config::WatchpostConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::events::ArmReport;
use crate::keyboard_input::KeyboardInputHandler;
use crate::motion::MotionSampler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main application coordinator that manages all system components
pub struct WatchpostOrchestrator {
    pub(super) engine: Arc<Engine>,

    // Components
    pub(super) sampler: Option<MotionSampler>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) lifecycle_task: Option<JoinHandle<bool>>,
    pub(super) dispatcher_task: Option<JoinHandle<Result<()>>>,
    pub(super) arm_report: Option<ArmReport>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: mpsc::Sender<ShutdownReason>,
    pub(super) shutdown_receiver: Option<mpsc::Receiver<ShutdownReason>>,
    pub(super) lifecycle_token: CancellationToken,
    pub(super) dispatcher_token: CancellationToken,
}

impl WatchpostOrchestrator {
    /// Create an orchestrator wired to the configured collaborators
    pub fn new(config: WatchpostConfig, dry_run: bool) -> Result<Self> {
        Ok(Self::with_engine(Engine::from_config(config, dry_run)?))
    }

    /// Create an orchestrator around an already built engine
    pub fn with_engine(engine: Arc<Engine>) -> Self {
        let (shutdown_sender, shutdown_receiver) = mpsc::channel(4);

        let sampler = engine
            .config()
            .motion
            .enabled
            .then(|| MotionSampler::new(Arc::clone(&engine)));
        let keyboard_handler = Some(KeyboardInputHandler::new(
            Arc::clone(&engine),
            shutdown_sender.clone(),
        ));

        Self {
            engine,
            sampler,
            keyboard_handler,
            keyboard_enabled: false, // enable via set_keyboard_enabled()
            lifecycle_task: None,
            dispatcher_task: None,
            arm_report: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender,
            shutdown_receiver: Some(shutdown_receiver),
            lifecycle_token: CancellationToken::new(),
            dispatcher_token: CancellationToken::new(),
        }
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Triggers armed and rejected at start, once started
    pub fn arm_report(&self) -> Option<&ArmReport> {
        self.arm_report.as_ref()
    }

    pub fn sampler(&self) -> Option<&MotionSampler> {
        self.sampler.as_ref()
    }

    /// Handle for requesting a shutdown from outside the run loop
    pub fn shutdown_handle(&self) -> mpsc::Sender<ShutdownReason> {
        self.shutdown_sender.clone()
    }

    /// Run one configured action outside of any event
    pub async fn run_action(&self, action_id: &str) -> Result<ActionOutcome> {
        ActionRunner::new(Arc::clone(&self.engine))
            .run_standalone(action_id)
            .await
    }
}
