//! Log Store Interface
//!
//! The append-only operation/lifecycle log store is an external collaborator;
//! this module defines the boundary the pipeline consumes: paginated entry
//! selection for a period, and lookups over previously completed traceability
//! events for period chaining. A file-backed implementation backs the CLI and
//! the test suites.

pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TraceabilityError;
use crate::model::{LogType, StoredTraceabilityEvent, TraceabilityEvent};

pub use file::FileLogStore;

/// An opaque structured record selected into a traceability batch.
/// Immutable once selected; consumed only for hashing and packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Boundary consumed from the external log store.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Select entries of `log_type` with `after < timestamp <= before`,
    /// ordered by (timestamp, id), skipping `offset` and returning at most
    /// `limit`. Repeated calls with increasing offsets stream a period in
    /// bounded-memory chunks.
    async fn select_entries(
        &self,
        log_type: LogType,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, TraceabilityError>;

    /// Append the summary of a completed run. Returns the identifier the
    /// store assigned to the event.
    async fn append_event(
        &self,
        event: &TraceabilityEvent,
    ) -> Result<String, TraceabilityError>;

    /// Most recently completed traceability event for `log_type`, if any.
    async fn find_last_completed_event(
        &self,
        log_type: LogType,
    ) -> Result<Option<StoredTraceabilityEvent>, TraceabilityError>;

    /// Completed traceability event of `log_type` whose end date is closest
    /// above `lower_bound` (ties broken most-recent-first), if any.
    async fn find_first_completed_event_ending_after(
        &self,
        log_type: LogType,
        lower_bound: DateTime<Utc>,
    ) -> Result<Option<StoredTraceabilityEvent>, TraceabilityError>;
}
