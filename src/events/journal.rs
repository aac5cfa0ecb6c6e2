use crate::error::Result;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lines kept in memory for status queries
const RECENT_LINES: usize = 200;

struct JournalInner {
    file: Option<File>,
    recent: VecDeque<String>,
}

/// Append-only, line-oriented event log.
///
/// Each line reads `<ISO-8601 timestamp> <category>: <text>`. Write failures
/// are logged and never surface to callers.
pub struct EventJournal {
    path: Option<PathBuf>,
    inner: Mutex<JournalInner>,
}

impl EventJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Event journal appending to {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: Mutex::new(JournalInner {
                file: Some(file),
                recent: VecDeque::with_capacity(RECENT_LINES),
            }),
        })
    }

    /// Journal that keeps lines in memory only
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(JournalInner {
                file: None,
                recent: VecDeque::with_capacity(RECENT_LINES),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, category: &str, text: &str) {
        let line = format!(
            "{} {}: {}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"),
            category,
            text
        );

        let mut inner = self.inner.lock();
        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to append to event journal: {}", e);
            }
        }
        if inner.recent.len() == RECENT_LINES {
            inner.recent.pop_front();
        }
        inner.recent.push_back(line);
    }

    /// Most recent lines, oldest first
    pub fn recent(&self) -> Vec<String> {
        self.inner.lock().recent.iter().cloned().collect()
    }
}
