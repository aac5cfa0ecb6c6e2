mod service;
mod simulated;

pub use service::CameraService;
pub use simulated::SimulatedCamera;
