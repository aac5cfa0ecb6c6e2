//! Structured event store backed by SQLite.

use crate::error::Result;
use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Row of the `events` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub date: String,
    pub minute: i64,
    pub time: String,
    pub event_type: String,
    pub trigger: String,
    pub trigger_type: String,
    pub trigger_param: String,
}

/// Row of the `eventactions` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub id: i64,
    pub event: String,
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub action_type: String,
    pub action_duration: Option<f64>,
    pub filename: String,
    pub fullpath: String,
}

/// Values for a new `eventactions` row
#[derive(Debug, Clone)]
pub struct NewAction<'a> {
    pub event: &'a str,
    pub at: DateTime<Local>,
    pub action_type: &'a str,
    pub duration: Option<f64>,
    pub filename: &'a str,
    pub fullpath: &'a str,
}

/// Number of events recorded on one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub events: i64,
}

pub struct EventStore {
    conn: Mutex<Connection>,
}

fn parse_event_time(event_id: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(event_id, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

impl EventStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;

        info!("Event store opened at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS events (
                timestamp TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                minute INTEGER NOT NULL,
                time TEXT NOT NULL,
                type TEXT NOT NULL,
                trigger TEXT NOT NULL,
                triggertype TEXT NOT NULL,
                triggerparam TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_date ON events(date);

            CREATE TABLE IF NOT EXISTS eventactions (
                event TEXT NOT NULL REFERENCES events(timestamp),
                timestamp TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                actiontype TEXT NOT NULL,
                actionduration REAL,
                filename TEXT NOT NULL,
                fullpath TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_eventactions_event ON eventactions(event);
            "#,
        )?;
        Ok(())
    }

    /// Record the start of an event
    pub fn insert_event(
        &self,
        event_id: &str,
        event_type: &str,
        trigger: &str,
        trigger_type: &str,
        trigger_param: &str,
    ) -> Result<()> {
        let at = parse_event_time(event_id).unwrap_or_else(|| Local::now().naive_local());
        let minute = (at.hour() * 60 + at.minute()) as i64;

        self.conn.lock().execute(
            "INSERT INTO events (timestamp, date, minute, time, type, trigger, triggertype, triggerparam)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event_id,
                at.format("%Y-%m-%d").to_string(),
                minute,
                at.format("%H:%M:%S").to_string(),
                event_type,
                trigger,
                trigger_type,
                trigger_param
            ],
        )?;
        debug!("Stored event {} ({})", event_id, trigger);
        Ok(())
    }

    /// Record an action result; returns the row id for later duration updates
    pub fn insert_action(&self, action: &NewAction<'_>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO eventactions (event, timestamp, date, time, actiontype, actionduration, filename, fullpath)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action.event,
                action.at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                action.at.format("%Y-%m-%d").to_string(),
                action.at.format("%H:%M:%S").to_string(),
                action.action_type,
                action.duration,
                action.filename,
                action.fullpath
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fill in the duration of a long-running action once it ends
    pub fn update_action_duration(&self, row_id: i64, duration_secs: f64) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE eventactions SET actionduration = ?1 WHERE rowid = ?2",
            params![duration_secs, row_id],
        )?;
        Ok(changed == 1)
    }

    pub fn event(&self, event_id: &str) -> Result<Option<EventRecord>> {
        let record = self
            .conn
            .lock()
            .query_row(
                "SELECT timestamp, date, minute, time, type, trigger, triggertype, triggerparam
                 FROM events WHERE timestamp = ?1",
                params![event_id],
                |row| {
                    Ok(EventRecord {
                        timestamp: row.get(0)?,
                        date: row.get(1)?,
                        minute: row.get(2)?,
                        time: row.get(3)?,
                        event_type: row.get(4)?,
                        trigger: row.get(5)?,
                        trigger_type: row.get(6)?,
                        trigger_param: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent events first
    pub fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, date, minute, time, type, trigger, triggertype, triggerparam
             FROM events ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(EventRecord {
                timestamp: row.get(0)?,
                date: row.get(1)?,
                minute: row.get(2)?,
                time: row.get(3)?,
                event_type: row.get(4)?,
                trigger: row.get(5)?,
                trigger_type: row.get(6)?,
                trigger_param: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Actions recorded for an event, in insertion order
    pub fn actions_for(&self, event_id: &str) -> Result<Vec<ActionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT rowid, event, timestamp, date, time, actiontype, actionduration, filename, fullpath
             FROM eventactions WHERE event = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok(ActionRecord {
                id: row.get(0)?,
                event: row.get(1)?,
                timestamp: row.get(2)?,
                date: row.get(3)?,
                time: row.get(4)?,
                action_type: row.get(5)?,
                action_duration: row.get(6)?,
                filename: row.get(7)?,
                fullpath: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Event counts per day, newest day first
    pub fn daily_counts(&self, days: usize) -> Result<Vec<DailyCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, COUNT(*) FROM events GROUP BY date ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![days as i64], |row| {
            Ok(DailyCount {
                date: row.get(0)?,
                events: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
