use crate::app::ShutdownReason;
use crate::engine::Engine;
use crate::error::Result;
use crate::model::SourceKind;
use crate::motion::MOTION_EVENT;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Fire the camera's motion trigger as if the sampler had seen motion
    Motion,
    Quit,
}

impl KeyCommand {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char(' ') => Some(KeyCommand::Motion),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}

/// Manual stimulus from the terminal for bench testing
pub struct KeyboardInputHandler {
    engine: Arc<Engine>,
    shutdown: mpsc::Sender<ShutdownReason>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeyboardInputHandler {
    pub fn new(engine: Arc<Engine>, shutdown: mpsc::Sender<ShutdownReason>) -> Self {
        Self {
            engine,
            shutdown,
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Fire the motion trigger bound to the camera, logging the event it opens
    pub fn stimulate_motion(engine: &Engine, runtime: &Handle) {
        match engine.stimulate(SourceKind::MotionSampler, engine.camera_id(), MOTION_EVENT) {
            Ok(Some(reply)) => {
                runtime.spawn(async move {
                    match reply.await {
                        Ok(Some(event_id)) => info!("Keyboard stimulus opened event {}", event_id),
                        Ok(None) => info!("Keyboard stimulus suppressed"),
                        Err(_) => warn!("Keyboard stimulus was dropped"),
                    }
                });
            }
            Ok(None) => warn!("No trigger armed on camera motion"),
            Err(e) => warn!("Failed to push keyboard stimulus: {}", e),
        }
    }

    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - SPACE fires motion, q or Esc quits");

        let engine = Arc::clone(&self.engine);
        let shutdown = self.shutdown.clone();
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        let handle = task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled - keyboard handler active");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        match KeyCommand::from_key(key_event.code) {
                            Some(KeyCommand::Motion) => {
                                info!("Space bar pressed - firing motion trigger");
                                Self::stimulate_motion(&engine, &runtime_handle);
                            }
                            Some(KeyCommand::Quit) => {
                                info!("Quit key pressed - requesting shutdown");
                                if shutdown.try_send(ShutdownReason::UserRequest).is_err() {
                                    warn!("Shutdown already requested");
                                }
                                break;
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
            debug!("Keyboard input handler task exited");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Keyboard task ended abnormally: {}", e);
            }
        }

        // the blocking task may have bailed out before restoring the terminal
        let _ = disable_raw_mode();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDispatcher, TriggerLifecycle};
    use crate::test_support::{action, harness, trigger};

    #[test]
    fn test_key_mapping() {
        assert_eq!(KeyCommand::from_key(KeyCode::Char(' ')), Some(KeyCommand::Motion));
        assert_eq!(KeyCommand::from_key(KeyCode::Char('q')), Some(KeyCommand::Quit));
        assert_eq!(KeyCommand::from_key(KeyCode::Esc), Some(KeyCommand::Quit));
        assert_eq!(KeyCommand::from_key(KeyCode::Enter), None);
    }

    #[tokio::test]
    async fn test_motion_stimulus_opens_event() {
        let harness = harness(|config| {
            config.action = vec![action("snap", SourceKind::Camera, "", "take_photo")];
            config.trigger = vec![trigger(
                "motion",
                SourceKind::MotionSampler,
                "camera",
                MOTION_EVENT,
                &["snap"],
            )];
        });
        let engine = Arc::clone(&harness.engine);
        TriggerLifecycle::new(Arc::clone(&engine)).arm_all();
        let cancel = CancellationToken::new();
        tokio::spawn(EventDispatcher::new(Arc::clone(&engine)).run(cancel.clone()));

        KeyboardInputHandler::stimulate_motion(&engine, &Handle::current());

        assert!(crate::test_support::eventually(|| {
            engine.store().recent_events(1).map(|e| e.len()).unwrap_or(0) == 1
        })
        .await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let harness = harness(|_| {});
        let (tx, _rx) = mpsc::channel(1);
        let handler = KeyboardInputHandler::new(Arc::clone(&harness.engine), tx);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
