//! File-backed log store
//!
//! Append-only JSONL files, one per log type for entries and one per log
//! type for completed traceability events. Serves the operator CLI and the
//! test suites; a production deployment would put a database-backed client
//! behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TraceabilityError;
use crate::logstore::{LogEntry, LogStore};
use crate::model::{LogType, StoredTraceabilityEvent, TraceabilityEvent};

pub struct FileLogStore {
    root: PathBuf,
    append_guard: Mutex<()>,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TraceabilityError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("entries"))?;
        std::fs::create_dir_all(root.join("events"))?;
        Ok(Self {
            root,
            append_guard: Mutex::new(()),
        })
    }

    fn entries_path(&self, log_type: LogType) -> PathBuf {
        self.root.join("entries").join(format!("{}.jsonl", log_type.name()))
    }

    fn events_path(&self, log_type: LogType) -> PathBuf {
        self.root.join("events").join(format!("{}.jsonl", log_type.name()))
    }

    /// Append one entry; used to seed stores from the CLI and from tests.
    pub async fn append_entry(
        &self,
        log_type: LogType,
        entry: &LogEntry,
    ) -> Result<(), TraceabilityError> {
        let _guard = self.append_guard.lock().await;
        append_line(&self.entries_path(log_type), entry)?;
        Ok(())
    }

    fn read_entries(&self, log_type: LogType) -> Result<Vec<LogEntry>, TraceabilityError> {
        read_lines(&self.entries_path(log_type))
    }

    fn read_events(
        &self,
        log_type: LogType,
    ) -> Result<Vec<StoredTraceabilityEvent>, TraceabilityError> {
        read_lines(&self.events_path(log_type))
    }
}

fn append_line<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), TraceabilityError> {
    let json = serde_json::to_string(value)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;
    file.flush()?;
    Ok(())
}

fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, TraceabilityError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| {
            TraceabilityError::Store(format!(
                "Corrupt record at {}:{}: {}",
                path.display(),
                line_num + 1,
                e
            ))
        })?;
        values.push(value);
    }
    Ok(values)
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn select_entries(
        &self,
        log_type: LogType,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, TraceabilityError> {
        let mut entries: Vec<LogEntry> = self
            .read_entries(log_type)?
            .into_iter()
            .filter(|e| e.timestamp > after && e.timestamp <= before)
            .collect();
        entries.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        let selected: Vec<LogEntry> = entries
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect();
        debug!(
            "Selected {} {} entries in ({}, {}] at offset {}",
            selected.len(),
            log_type.name(),
            after,
            before,
            offset
        );
        Ok(selected)
    }

    async fn append_event(
        &self,
        event: &TraceabilityEvent,
    ) -> Result<String, TraceabilityError> {
        let _guard = self.append_guard.lock().await;
        let stored = StoredTraceabilityEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.clone(),
        };
        append_line(&self.events_path(event.log_type), &stored)?;
        Ok(stored.event_id)
    }

    async fn find_last_completed_event(
        &self,
        log_type: LogType,
    ) -> Result<Option<StoredTraceabilityEvent>, TraceabilityError> {
        let events = self.read_events(log_type)?;
        // Append order breaks end-date ties in favor of the newest event.
        Ok(events
            .into_iter()
            .enumerate()
            .max_by_key(|(position, stored)| (stored.event.end_date, *position))
            .map(|(_, stored)| stored))
    }

    async fn find_first_completed_event_ending_after(
        &self,
        log_type: LogType,
        lower_bound: DateTime<Utc>,
    ) -> Result<Option<StoredTraceabilityEvent>, TraceabilityError> {
        let events = self.read_events(log_type)?;
        Ok(events
            .into_iter()
            .enumerate()
            .filter(|(_, stored)| stored.event.end_date >= lower_bound)
            .min_by_key(|(position, stored)| (stored.event.end_date, std::cmp::Reverse(*position)))
            .map(|(_, stored)| stored))
    }
}
