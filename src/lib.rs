pub mod actions;
pub mod app;
pub mod camera;
pub mod catalogue;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod gpio;
pub mod keyboard_input;
pub mod model;
pub mod motion;
pub mod notify;
pub mod registry;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::{ActionOutcome, ActionRunner};
pub use app::{ComponentState, ShutdownReason, WatchpostOrchestrator};
pub use camera::{CameraService, SimulatedCamera};
pub use catalogue::Catalogue;
pub use config::WatchpostConfig;
pub use debounce::DebounceGate;
pub use engine::{Engine, EngineBuilder};
pub use error::{Result, WatchpostError};
pub use events::{EventDispatcher, EventJournal, EventStore, TriggerLifecycle};
pub use frame::{FrameData, FrameFormat};
pub use gpio::{GpioDevice, MemoryPins, PinBackend, SysfsPins};
pub use keyboard_input::KeyboardInputHandler;
pub use model::{Action, DeviceSpec, ParamValue, SourceKind, Trigger};
pub use motion::{MotionDetector, MotionSampler};
pub use notify::{LogTransport, MailMessage, MailTransport};
pub use registry::DeviceRegistry;
pub use status::StatusBoard;
