use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Last known state of a device that needs calibration continuity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub value: f64,
}

/// JSON-backed store of per-device state blobs
pub struct DeviceStateStore {
    path: Option<PathBuf>,
    states: Mutex<BTreeMap<String, DeviceState>>,
}

impl DeviceStateStore {
    /// Open the store, reading any previously persisted states
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let states = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        info!(
            "Loaded {} persisted device state(s) from {}",
            states.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path),
            states: Mutex::new(states),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            states: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.states.lock().get(device_id).copied()
    }

    /// Record a new value, writing the store only when the value changed
    pub fn set(&self, device_id: &str, value: f64) -> Result<()> {
        let snapshot = {
            let mut states = self.states.lock();
            let new_state = DeviceState { value };
            if states.get(device_id) == Some(&new_state) {
                return Ok(());
            }
            states.insert(device_id.to_string(), new_state);
            states.clone()
        };

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
            debug!("Persisted state of {} (value={})", device_id, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/devices.json");

        let store = DeviceStateStore::open(&path).unwrap();
        assert!(store.get("stepper").is_none());
        store.set("stepper", 90.0).unwrap();

        let reopened = DeviceStateStore::open(&path).unwrap();
        assert_eq!(reopened.get("stepper"), Some(DeviceState { value: 90.0 }));
    }

    #[test]
    fn test_in_memory_store() {
        let store = DeviceStateStore::in_memory();
        store.set("servo", 0.5).unwrap();
        assert_eq!(store.get("servo").unwrap().value, 0.5);
    }
}
