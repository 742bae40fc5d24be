//! Period Chain Resolver
//!
//! Binds the current run to its past: the token of the most recent run, and
//! the tokens of the runs closest past the one-month and one-year horizons.
//! A verifier can then confirm that a period's root transitively commits to
//! everything since the last yearly checkpoint without replaying the full
//! history. Lookups are read-only queries against the append-only store,
//! never in-memory back-pointers.

use chrono::{DateTime, Months, Utc};
use tracing::debug;

use crate::error::TraceabilityError;
use crate::logstore::LogStore;
use crate::model::LogType;

/// Tokens of the prior periods the current run chains to. Resolved once per
/// run and cached for the duration of that run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodChainTokens {
    pub previous: Option<Vec<u8>>,
    pub previous_month: Option<Vec<u8>>,
    pub previous_year: Option<Vec<u8>>,
}

pub struct PeriodChainResolver<'a> {
    store: &'a dyn LogStore,
}

impl<'a> PeriodChainResolver<'a> {
    pub fn new(store: &'a dyn LogStore) -> Self {
        Self { store }
    }

    /// Resolve the three chain tokens for a run ending at `period_end`.
    ///
    /// An event already consumed for a nearer link is skipped, so the same
    /// token is never chained twice within one run. The very first run of a
    /// log type resolves to three absent tokens.
    pub async fn resolve(
        &self,
        log_type: LogType,
        period_end: DateTime<Utc>,
    ) -> Result<PeriodChainTokens, TraceabilityError> {
        let mut used_event_ids: Vec<String> = Vec::new();

        let previous = match self.find_last(log_type).await? {
            Some(stored) => {
                used_event_ids.push(stored.event_id);
                Some(stored.event.timestamp_token)
            }
            None => None,
        };

        let previous_month = self
            .find_boundary_token(log_type, period_end, 1, &mut used_event_ids)
            .await?;
        let previous_year = self
            .find_boundary_token(log_type, period_end, 12, &mut used_event_ids)
            .await?;

        debug!(
            "Chain for {} ending {}: previous={} month={} year={}",
            log_type.name(),
            period_end,
            previous.is_some(),
            previous_month.is_some(),
            previous_year.is_some()
        );

        Ok(PeriodChainTokens {
            previous,
            previous_month,
            previous_year,
        })
    }

    async fn find_last(
        &self,
        log_type: LogType,
    ) -> Result<Option<crate::model::StoredTraceabilityEvent>, TraceabilityError> {
        self.store
            .find_last_completed_event(log_type)
            .await
            .map_err(fatal_on_corrupt_history)
    }

    async fn find_boundary_token(
        &self,
        log_type: LogType,
        period_end: DateTime<Utc>,
        months_back: u32,
        used_event_ids: &mut Vec<String>,
    ) -> Result<Option<Vec<u8>>, TraceabilityError> {
        let Some(lower_bound) = period_end.checked_sub_months(Months::new(months_back)) else {
            return Ok(None);
        };

        let candidate = self
            .store
            .find_first_completed_event_ending_after(log_type, lower_bound)
            .await
            .map_err(fatal_on_corrupt_history)?;

        match candidate {
            Some(stored) if !used_event_ids.contains(&stored.event_id) => {
                used_event_ids.push(stored.event_id);
                Ok(Some(stored.event.timestamp_token))
            }
            _ => Ok(None),
        }
    }
}

/// Chaining cannot safely guess a substitute for a prior event it cannot
/// read, so corrupt history is fatal rather than retryable.
fn fatal_on_corrupt_history(err: TraceabilityError) -> TraceabilityError {
    match err {
        TraceabilityError::Store(msg) => {
            TraceabilityError::Fatal(format!("Corrupt traceability history: {}", msg))
        }
        other => other,
    }
}
