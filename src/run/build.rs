//! Build path of the traceability orchestrator
//!
//! Streams a period's entries in bounded-memory chunks, reconciles their
//! digests against every configured replica, folds the secured lines into a
//! Merkle accumulator in selection order, resolves the period chain, obtains
//! a timestamp token and persists the run package. Every phase transition is
//! checkpointed, so a retried run resumes instead of rebuilding, and a run
//! whose artifacts already exist replays completion without touching the
//! authority again.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alert::AlertService;
use crate::canonical::{canonical_digest, canonicalize, CanonicalDigest};
use crate::chain::PeriodChainResolver;
use crate::config::EngineConfig;
use crate::error::TraceabilityError;
use crate::logstore::{LogEntry, LogStore};
use crate::merkle::MerkleAccumulator;
use crate::model::{
    initial_start_date, LogType, ObjectDigestEntry, RunReport, RunStatus, SecureLogLine,
    TraceabilityEvent, TraceabilityStatistics,
};
use crate::reconcile::{collect_replica_digests, DigestValidator, EntityKind};
use crate::replica::ReplicaClient;
use crate::run::artifacts::{ComputingInformation, LeafWriter, MerkleDescriptor, RunCursor, RunPackage};
use crate::run::{BuildPhase, RunContext};
use crate::tsa::{chain_imprint, MessageImprint, TimestampAuthority};

pub struct TraceabilityEngine {
    store: Arc<dyn LogStore>,
    replicas: Arc<dyn ReplicaClient>,
    authority: Arc<dyn TimestampAuthority>,
    alerts: Arc<dyn AlertService>,
    config: EngineConfig,
}

impl TraceabilityEngine {
    pub fn new(
        store: Arc<dyn LogStore>,
        replicas: Arc<dyn ReplicaClient>,
        authority: Arc<dyn TimestampAuthority>,
        alerts: Arc<dyn AlertService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            replicas,
            authority,
            alerts,
            config,
        }
    }

    /// Run one traceability build for `log_type`.
    ///
    /// The period starts where the last completed run ended (or at the epoch
    /// sentinel for the first run) and closes `temporization_delay` before
    /// now. Failures are recorded on the run report as well as returned.
    pub async fn secure(
        &self,
        ctx: &RunContext,
        log_type: LogType,
    ) -> Result<RunReport, TraceabilityError> {
        let start_date = match self.store.find_last_completed_event(log_type).await? {
            Some(stored) => stored.event.end_date,
            None => initial_start_date(),
        };
        let run_id = RunPackage::run_id(log_type, start_date);
        let package = RunPackage::open(&self.config.package_root, &run_id)?;

        info!(
            "Traceability build {} for tenant {} (request {}) starting at {}",
            run_id, ctx.tenant, ctx.request_id, start_date
        );

        match self.secure_inner(log_type, start_date, &package).await {
            Ok(report) => {
                package.write_report(&report)?;
                package.delete_cursor()?;
                info!(
                    "Traceability build {} finished with status {:?} ({} entries)",
                    run_id, report.status, report.number_of_entries
                );
                Ok(report)
            }
            Err(err) => {
                self.record_failure(&package, log_type, &err);
                Err(err)
            }
        }
    }

    async fn secure_inner(
        &self,
        log_type: LogType,
        start_date: chrono::DateTime<Utc>,
        package: &RunPackage,
    ) -> Result<RunReport, TraceabilityError> {
        let mut cursor = match package.load_cursor()? {
            Some(cursor) => {
                info!(
                    "Resuming run {} in phase {:?} at {} entries",
                    package.id(),
                    cursor.phase,
                    cursor.entries_processed
                );
                cursor
            }
            None if package.is_complete() => return self.replay(package),
            None => {
                let end_date =
                    Utc::now() - Duration::seconds(self.config.temporization_delay_secs);
                let cursor = RunCursor {
                    phase: BuildPhase::Selecting,
                    start_date,
                    end_date,
                    entries_processed: 0,
                    last_entry_timestamp: None,
                    max_entries_reached: false,
                    statistics: TraceabilityStatistics::default(),
                };
                package.write_cursor(&cursor)?;
                cursor
            }
        };

        self.drive(log_type, package, &mut cursor).await
    }

    async fn drive(
        &self,
        log_type: LogType,
        package: &RunPackage,
        cursor: &mut RunCursor,
    ) -> Result<RunReport, TraceabilityError> {
        if cursor.phase == BuildPhase::Selecting {
            let descriptor = self.stream_and_fold(log_type, package, cursor).await?;
            package.write_merkle(&descriptor)?;
            cursor.phase = BuildPhase::TreeBuilt;
            package.write_cursor(cursor)?;
        }

        let merkle = package
            .load_merkle()?
            .ok_or_else(|| TraceabilityError::Store("Missing Merkle descriptor".to_string()))?;

        if cursor.phase == BuildPhase::TreeBuilt {
            let resolver = PeriodChainResolver::new(self.store.as_ref());
            let chain = resolver.resolve(log_type, cursor.end_date).await?;
            package.write_computing(&ComputingInformation::new(merkle.root.clone(), &chain))?;
            cursor.phase = BuildPhase::Chained;
            package.write_cursor(cursor)?;
        }

        let computing = package
            .load_computing()?
            .ok_or_else(|| TraceabilityError::Store("Missing computing information".to_string()))?;

        if cursor.phase == BuildPhase::Chained {
            let root = CanonicalDigest {
                algorithm: merkle.algorithm,
                value: merkle.root.clone(),
            };
            let imprint = chain_imprint(&root, &computing.chain_tokens()?);
            let token_bytes = self.issue_with_retry(&imprint).await?;
            package.write_token(&token_bytes)?;
            cursor.phase = BuildPhase::TokenIssued {
                event_appended: false,
            };
            package.write_cursor(cursor)?;
        }

        let token_bytes = package
            .load_token()?
            .ok_or_else(|| TraceabilityError::Store("Missing timestamp token".to_string()))?;

        let event = TraceabilityEvent {
            log_type,
            start_date: cursor.start_date,
            end_date: cursor.end_date,
            digest_algorithm: merkle.algorithm,
            root_hash: merkle.root.clone(),
            file_name: package.leaf_file_name(),
            timestamp_token: token_bytes,
            number_of_entries: cursor.entries_processed,
            max_entries_reached: cursor.max_entries_reached,
            statistics: cursor.statistics,
        };

        if let BuildPhase::TokenIssued {
            event_appended: false,
        } = cursor.phase
        {
            self.store.append_event(&event).await?;
            cursor.phase = BuildPhase::TokenIssued {
                event_appended: true,
            };
            package.write_cursor(cursor)?;
        }

        package.write_event(&event)?;
        Ok(report_for(package.id(), &event))
    }

    /// Completion replay for a run whose artifacts already exist: nothing is
    /// recomputed and the authority is not re-invoked.
    fn replay(&self, package: &RunPackage) -> Result<RunReport, TraceabilityError> {
        let event = package
            .load_event()?
            .ok_or_else(|| TraceabilityError::Store("Missing run summary".to_string()))?;
        info!("Run {} already complete; replaying completion", package.id());
        Ok(report_for(package.id(), &event))
    }

    async fn stream_and_fold(
        &self,
        log_type: LogType,
        package: &RunPackage,
        cursor: &mut RunCursor,
    ) -> Result<MerkleDescriptor, TraceabilityError> {
        let algorithm = self.config.digest_algorithm;

        // Rebuild the accumulator from the persisted leaf log, discarding any
        // lines written after the last checkpoint.
        package.truncate_leaves_to(cursor.entries_processed)?;
        let mut accumulator = MerkleAccumulator::new(algorithm);
        for line in package.load_leaf_lines()? {
            accumulator.add_leaf(&line);
        }

        let mut validator =
            DigestValidator::with_statistics(self.alerts.clone(), cursor.statistics);
        let mut writer = package.leaf_writer()?;

        loop {
            if cursor.entries_processed >= self.config.max_entries_per_run {
                cursor.max_entries_reached = true;
                break;
            }
            let remaining = self.config.max_entries_per_run - cursor.entries_processed;
            let limit = self.config.chunk_size.min(remaining as usize);

            let chunk = self
                .store
                .select_entries(
                    log_type,
                    cursor.start_date,
                    cursor.end_date,
                    cursor.entries_processed,
                    limit,
                )
                .await?;
            if chunk.is_empty() {
                break;
            }

            self.process_chunk(log_type, &chunk, &mut validator, &mut accumulator, &mut writer)
                .await?;
            writer.flush()?;

            cursor.entries_processed += chunk.len() as u64;
            cursor.last_entry_timestamp = chunk.last().map(|entry| entry.timestamp);
            cursor.statistics = validator.statistics();
            package.write_cursor(cursor)?;
        }

        if cursor.max_entries_reached {
            // The committed period narrows to the last included entry.
            if let Some(last_timestamp) = cursor.last_entry_timestamp {
                cursor.end_date = last_timestamp;
            }
            warn!(
                "Run {} reached the {}-entry cap; period narrowed to {}",
                package.id(),
                self.config.max_entries_per_run,
                cursor.end_date
            );
        }
        if cursor.entries_processed == 0 {
            warn!("Run {} selected no entries to secure", package.id());
        }

        let root = accumulator.compute_root();

        // Confirm the fresh tree against the persisted leaf log before
        // packaging: the committed file must fold back to the same root.
        let persisted = package.load_leaf_lines()?;
        let persisted_ok = crate::merkle::verify_leaves(
            persisted.iter().map(|line| line.as_slice()),
            algorithm,
            &root.value,
        );
        if !persisted_ok {
            return Err(TraceabilityError::integrity(
                package.id(),
                "persisted leaf log does not reproduce the freshly built root",
            ));
        }

        Ok(MerkleDescriptor {
            root: root.value,
            algorithm,
            leaf_count: accumulator.leaf_count(),
        })
    }

    async fn process_chunk(
        &self,
        log_type: LogType,
        entries: &[LogEntry],
        validator: &mut DigestValidator,
        accumulator: &mut MerkleAccumulator,
        writer: &mut LeafWriter,
    ) -> Result<(), TraceabilityError> {
        let algorithm = self.config.digest_algorithm;

        struct Prepared<'a> {
            entry: &'a LogEntry,
            record_digest: String,
            events_digest: Option<String>,
            object_refs: Vec<(String, String)>,
        }

        let mut prepared: Vec<Prepared> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.payload.is_object() {
                return Err(TraceabilityError::Fatal(format!(
                    "Entry {} cannot be canonicalized: payload is not an object",
                    entry.id
                )));
            }
            let record_digest = canonical_digest(&entry.payload, algorithm)?.value;
            let events_digest = if log_type.digests_event_aggregate() {
                let events = entry
                    .payload
                    .get("events")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(vec![]));
                Some(canonical_digest(&events, algorithm)?.value)
            } else {
                None
            };
            let object_refs = if log_type == LogType::ObjectGroupLifecycle {
                object_refs(entry)?
            } else {
                vec![]
            };
            prepared.push(Prepared {
                entry,
                record_digest,
                events_digest,
                object_refs,
            });
        }

        let entry_ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();
        let metadata_report = collect_replica_digests(
            self.replicas.as_ref(),
            log_type.data_category(),
            &self.config.replica_ids,
            &entry_ids,
        )
        .await?;

        let all_object_ids: Vec<String> = prepared
            .iter()
            .flat_map(|p| p.object_refs.iter().map(|(id, _)| id.clone()))
            .collect();
        let object_report = if all_object_ids.is_empty() {
            HashMap::new()
        } else {
            collect_replica_digests(
                self.replicas.as_ref(),
                crate::model::DataCategory::Object,
                &self.config.replica_ids,
                &all_object_ids,
            )
            .await?
        };

        for item in prepared {
            let per_replica = metadata_report
                .get(&item.entry.id)
                .cloned()
                .unwrap_or_default();
            let verdict = validator.validate(
                EntityKind::Metadata,
                &item.entry.id,
                &item.record_digest,
                &per_replica,
            );

            let object_digests = if item.object_refs.is_empty() {
                None
            } else {
                let mut reconciled = Vec::with_capacity(item.object_refs.len());
                for (object_id, authoritative) in &item.object_refs {
                    let per_replica = object_report.get(object_id).cloned().unwrap_or_default();
                    let object_verdict = validator.validate(
                        EntityKind::Object,
                        object_id,
                        authoritative,
                        &per_replica,
                    );
                    reconciled.push(ObjectDigestEntry {
                        object_id: object_id.clone(),
                        storage_digest: object_verdict.global_digest(),
                        replica_detail: object_verdict.replica_detail(),
                    });
                }
                Some(reconciled)
            };

            let line = SecureLogLine {
                entry_id: item.entry.id.clone(),
                entry_timestamp: item.entry.timestamp,
                record_digest: item.record_digest,
                events_digest: item.events_digest,
                storage_digest: verdict.global_digest(),
                replica_detail: verdict.replica_detail(),
                object_digests,
            };
            let line_bytes = canonicalize(&serde_json::to_value(&line)?)?;
            writer.append(&line_bytes)?;
            accumulator.add_leaf(&line_bytes);
        }
        Ok(())
    }

    async fn issue_with_retry(
        &self,
        imprint: &MessageImprint,
    ) -> Result<Vec<u8>, TraceabilityError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.authority.sign_digest(imprint).await {
                Ok(token) => return Ok(token),
                Err(err) if err.is_retryable() && attempt < self.config.retry_attempts => {
                    warn!(
                        "Timestamp authority attempt {}/{} failed: {}",
                        attempt, self.config.retry_attempts, err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn record_failure(&self, package: &RunPackage, log_type: LogType, err: &TraceabilityError) {
        let status = match err {
            TraceabilityError::Integrity { .. } | TraceabilityError::Transient(_) => RunStatus::Ko,
            _ => RunStatus::Fatal,
        };
        let cursor = package.load_cursor().ok().flatten();
        let (start_date, end_date, entries, max_reached, statistics) = match &cursor {
            Some(c) => (
                c.start_date,
                c.end_date,
                c.entries_processed,
                c.max_entries_reached,
                c.statistics,
            ),
            None => (
                initial_start_date(),
                initial_start_date(),
                0,
                false,
                TraceabilityStatistics::default(),
            ),
        };
        let report = RunReport {
            run_id: package.id().to_string(),
            log_type,
            status,
            reason: Some(err.to_string()),
            start_date,
            end_date,
            number_of_entries: entries,
            max_entries_reached: max_reached,
            statistics,
        };
        if let Err(report_err) = package.write_report(&report) {
            warn!("Could not record failure report: {}", report_err);
        }
    }
}

/// Extract `(object_id, authoritative_digest)` pairs from an object-group
/// lifecycle payload. Physical objects carry no digest and are skipped.
fn object_refs(entry: &LogEntry) -> Result<Vec<(String, String)>, TraceabilityError> {
    let Some(objects) = entry.payload.get("objects") else {
        return Ok(vec![]);
    };
    let Some(objects) = objects.as_array() else {
        return Err(TraceabilityError::Fatal(format!(
            "Entry {}: objects is not an array",
            entry.id
        )));
    };

    let mut refs = Vec::with_capacity(objects.len());
    for object in objects {
        if object.get("physical_id").is_some() {
            continue;
        }
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TraceabilityError::Fatal(format!("Entry {}: object without id", entry.id))
            })?;
        let digest = object
            .get("digest")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TraceabilityError::Fatal(format!(
                    "Entry {}: object {} without digest",
                    entry.id, id
                ))
            })?;
        refs.push((id.to_string(), digest.to_string()));
    }
    Ok(refs)
}

pub(crate) fn report_for(run_id: &str, event: &TraceabilityEvent) -> RunReport {
    let mut reasons: Vec<&str> = Vec::new();
    if event.number_of_entries == 0 {
        reasons.push("no entries selected; period flagged empty");
    }
    if event.max_entries_reached {
        reasons.push("entry cap reached; period narrowed");
    }
    if event.statistics.has_inconsistencies() {
        reasons.push("digest inconsistencies found");
    }
    let status = if reasons.is_empty() {
        RunStatus::Ok
    } else {
        RunStatus::Warning
    };
    RunReport {
        run_id: run_id.to_string(),
        log_type: event.log_type,
        status,
        reason: if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        },
        start_date: event.start_date,
        end_date: event.end_date,
        number_of_entries: event.number_of_entries,
        max_entries_reached: event.max_entries_reached,
        statistics: event.statistics,
    }
}
