mod backend;
mod device;
mod operations;
mod state;
#[cfg(test)]
mod tests;

pub use backend::{MemoryPins, PinBackend, PinMode, SysfsPins};
pub use device::GpioDevice;
pub use state::{DeviceState, DeviceStateStore};
