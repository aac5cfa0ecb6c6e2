use crate::error::DeviceError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Direction a pin is claimed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Access to physical (or simulated) GPIO lines.
///
/// Levels are expressed as `0.0..=1.0`; digital backends treat anything at or
/// above `0.5` as high.
pub trait PinBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Take exclusive ownership of a line
    fn claim(&self, pin: u32, mode: PinMode) -> Result<(), DeviceError>;

    /// Give a line back; releasing an unclaimed line is a no-op
    fn release(&self, pin: u32);

    fn write(&self, pin: u32, level: f64) -> Result<(), DeviceError>;

    fn read(&self, pin: u32) -> Result<f64, DeviceError>;
}

#[derive(Debug, Clone)]
struct SimulatedPin {
    mode: PinMode,
    level: f64,
}

/// In-process pin simulation used for dry runs and tests
#[derive(Default)]
pub struct MemoryPins {
    pins: Mutex<HashMap<u32, SimulatedPin>>,
    inputs: Mutex<HashMap<u32, f64>>,
    history: Mutex<Vec<(u32, f64)>>,
}

impl MemoryPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input line from the outside world
    pub fn set_input(&self, pin: u32, level: f64) {
        self.inputs.lock().insert(pin, level);
        if let Some(state) = self.pins.lock().get_mut(&pin) {
            if state.mode == PinMode::Input {
                state.level = level;
            }
        }
    }

    pub fn level(&self, pin: u32) -> Option<f64> {
        self.pins.lock().get(&pin).map(|state| state.level)
    }

    pub fn is_claimed(&self, pin: u32) -> bool {
        self.pins.lock().contains_key(&pin)
    }

    /// Every level written, in order
    pub fn history(&self) -> Vec<(u32, f64)> {
        self.history.lock().clone()
    }
}

impl PinBackend for MemoryPins {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn claim(&self, pin: u32, mode: PinMode) -> Result<(), DeviceError> {
        let mut pins = self.pins.lock();
        if pins.contains_key(&pin) {
            return Err(DeviceError::PinClaimed { pin });
        }
        let level = match mode {
            PinMode::Input => self.inputs.lock().get(&pin).copied().unwrap_or(0.0),
            PinMode::Output => 0.0,
        };
        pins.insert(pin, SimulatedPin { mode, level });
        debug!("Claimed simulated pin {} as {:?}", pin, mode);
        Ok(())
    }

    fn release(&self, pin: u32) {
        if self.pins.lock().remove(&pin).is_some() {
            debug!("Released simulated pin {}", pin);
        }
    }

    fn write(&self, pin: u32, level: f64) -> Result<(), DeviceError> {
        let mut pins = self.pins.lock();
        let state = pins.get_mut(&pin).ok_or_else(|| DeviceError::PinAccess {
            pin,
            details: "pin not claimed".to_string(),
        })?;
        if state.mode != PinMode::Output {
            return Err(DeviceError::PinAccess {
                pin,
                details: "pin is an input".to_string(),
            });
        }
        state.level = level;
        self.history.lock().push((pin, level));
        Ok(())
    }

    fn read(&self, pin: u32) -> Result<f64, DeviceError> {
        let pins = self.pins.lock();
        let state = pins.get(&pin).ok_or_else(|| DeviceError::PinAccess {
            pin,
            details: "pin not claimed".to_string(),
        })?;
        if state.mode == PinMode::Input {
            Ok(self.inputs.lock().get(&pin).copied().unwrap_or(state.level))
        } else {
            Ok(state.level)
        }
    }
}

/// Linux sysfs GPIO interface (`/sys/class/gpio`)
pub struct SysfsPins {
    root: PathBuf,
    claimed: Mutex<HashMap<u32, PinMode>>,
}

impl SysfsPins {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            claimed: Mutex::new(HashMap::new()),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn write_file(&self, pin: u32, path: PathBuf, contents: &str) -> Result<(), DeviceError> {
        fs::write(&path, contents).map_err(|e| DeviceError::PinAccess {
            pin,
            details: format!("{}: {}", path.display(), e),
        })
    }
}

impl PinBackend for SysfsPins {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn claim(&self, pin: u32, mode: PinMode) -> Result<(), DeviceError> {
        let mut claimed = self.claimed.lock();
        if claimed.contains_key(&pin) {
            return Err(DeviceError::PinClaimed { pin });
        }

        if !self.pin_dir(pin).exists() {
            self.write_file(pin, self.root.join("export"), &pin.to_string())?;
        }

        let direction = match mode {
            PinMode::Input => "in",
            PinMode::Output => "out",
        };
        self.write_file(pin, self.pin_dir(pin).join("direction"), direction)?;

        claimed.insert(pin, mode);
        debug!("Exported sysfs pin {} as {}", pin, direction);
        Ok(())
    }

    fn release(&self, pin: u32) {
        if self.claimed.lock().remove(&pin).is_none() {
            return;
        }
        if let Err(e) = self.write_file(pin, self.root.join("unexport"), &pin.to_string()) {
            warn!("Failed to unexport sysfs pin {}: {}", pin, e);
        }
    }

    fn write(&self, pin: u32, level: f64) -> Result<(), DeviceError> {
        let value = if level >= 0.5 { "1" } else { "0" };
        self.write_file(pin, self.pin_dir(pin).join("value"), value)
    }

    fn read(&self, pin: u32) -> Result<f64, DeviceError> {
        let path = self.pin_dir(pin).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| DeviceError::PinAccess {
            pin,
            details: format!("{}: {}", path.display(), e),
        })?;
        match raw.trim() {
            "1" => Ok(1.0),
            "0" => Ok(0.0),
            other => Err(DeviceError::PinAccess {
                pin,
                details: format!("unexpected value '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pins_exclusive_claim() {
        let pins = MemoryPins::new();
        pins.claim(17, PinMode::Output).unwrap();
        assert!(matches!(
            pins.claim(17, PinMode::Output),
            Err(DeviceError::PinClaimed { pin: 17 })
        ));

        pins.release(17);
        assert!(!pins.is_claimed(17));
        assert!(pins.claim(17, PinMode::Input).is_ok());
    }

    #[test]
    fn test_memory_pins_input_simulation() {
        let pins = MemoryPins::new();
        pins.claim(4, PinMode::Input).unwrap();
        assert_eq!(pins.read(4).unwrap(), 0.0);
        pins.set_input(4, 1.0);
        assert_eq!(pins.read(4).unwrap(), 1.0);
        assert!(pins.write(4, 1.0).is_err());
    }

    #[test]
    fn test_sysfs_pins_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("gpio17")).unwrap();

        let pins = SysfsPins::new(root.path());
        pins.claim(17, PinMode::Output).unwrap();
        assert_eq!(
            std::fs::read_to_string(root.path().join("gpio17/direction")).unwrap(),
            "out"
        );

        pins.write(17, 1.0).unwrap();
        assert_eq!(pins.read(17).unwrap(), 1.0);

        pins.release(17);
        assert_eq!(
            std::fs::read_to_string(root.path().join("unexport")).unwrap(),
            "17"
        );
    }
}
