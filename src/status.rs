//! Process-wide last-error fields, one per operation category.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub error: String,
    pub detail: Option<String>,
    pub at: DateTime<Local>,
}

/// Most recent error per category, cleared by the next success of that category
#[derive(Default)]
pub struct StatusBoard {
    entries: Mutex<HashMap<String, StatusEntry>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_error(&self, category: &str, error: impl Into<String>, detail: Option<String>) {
        self.entries.lock().insert(
            category.to_string(),
            StatusEntry {
                error: error.into(),
                detail,
                at: Local::now(),
            },
        );
    }

    pub fn clear(&self, category: &str) {
        self.entries.lock().remove(category);
    }

    pub fn get(&self, category: &str) -> Option<StatusEntry> {
        self.entries.lock().get(category).cloned()
    }

    /// The newest error across all categories
    pub fn last_error(&self) -> Option<(String, StatusEntry)> {
        self.entries
            .lock()
            .iter()
            .max_by_key(|(_, entry)| entry.at)
            .map(|(category, entry)| (category.clone(), entry.clone()))
    }

    pub fn snapshot(&self) -> HashMap<String, StatusEntry> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_clears_only_its_category() {
        let board = StatusBoard::new();
        board.post_error("GPIO", "pin 17 busy", None);
        board.post_error("SMTP", "delivery failed", Some("connection refused".into()));

        board.clear("GPIO");
        assert!(board.get("GPIO").is_none());
        let smtp = board.get("SMTP").unwrap();
        assert_eq!(smtp.detail.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_last_error_is_newest() {
        let board = StatusBoard::new();
        board.post_error("GPIO", "first", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        board.post_error("Camera", "second", None);

        let (category, entry) = board.last_error().unwrap();
        assert_eq!(category, "Camera");
        assert_eq!(entry.error, "second");
    }
}
