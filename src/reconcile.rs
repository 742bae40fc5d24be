//! Replica Digest Reconciler
//!
//! Cross-validates the digest recorded as authoritative for an object
//! against the digest every configured replica actually holds. A verdict is
//! never trusted to a single source: validity requires at least one replica
//! to corroborate the authoritative value and no replica to contradict it.
//! Partial replica lag or outage is tolerated and alerted, but a digest no
//! replica holds is never certified.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::alert::{AlertService, AlertSeverity};
use crate::error::TraceabilityError;
use crate::model::{
    DataCategory, DigestValidationCounters, ReplicaDigestDetail, ReplicaId,
    TraceabilityStatistics,
};
use crate::replica::{BulkDigestReport, ReplicaClient};

/// Sentinel propagated downstream in place of a digest that could not be
/// corroborated; any later integrity check depending on it must fail.
pub const INVALID_DIGEST_MARKER: &str = "INVALID_DIGEST";

/// Entity kind a verdict counts against in the run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Metadata,
    Object,
}

/// Outcome of reconciling one object. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct DigestValidationVerdict {
    pub object_id: String,
    pub valid: bool,
    pub authoritative_digest: String,
    pub digest_by_replica: BTreeMap<ReplicaId, Option<String>>,
    pub inconsistent_replicas: Vec<ReplicaId>,
    pub missing_replicas: Vec<ReplicaId>,
}

impl DigestValidationVerdict {
    /// Digest emitted downstream: the authoritative value when corroborated,
    /// else the invalid marker.
    pub fn global_digest(&self) -> String {
        if self.valid {
            self.authoritative_digest.clone()
        } else {
            INVALID_DIGEST_MARKER.to_string()
        }
    }

    pub fn has_inconsistencies(&self) -> bool {
        !self.valid || !self.inconsistent_replicas.is_empty() || !self.missing_replicas.is_empty()
    }

    /// Replica detail worth persisting on the secured line, present only
    /// when something disagreed or was missing.
    pub fn replica_detail(&self) -> Option<ReplicaDigestDetail> {
        if !self.has_inconsistencies() {
            return None;
        }
        Some(ReplicaDigestDetail {
            replica_ids: self.digest_by_replica.keys().cloned().collect(),
            authoritative_digest: self.authoritative_digest.clone(),
            digest_by_replica: self.digest_by_replica.clone(),
        })
    }
}

/// Reconciles digests for one run, accumulating per-entity-kind statistics
/// and raising operator alerts on disagreement.
pub struct DigestValidator {
    alerts: Arc<dyn AlertService>,
    metadata: DigestValidationCounters,
    objects: DigestValidationCounters,
}

impl DigestValidator {
    pub fn new(alerts: Arc<dyn AlertService>) -> Self {
        Self {
            alerts,
            metadata: DigestValidationCounters::default(),
            objects: DigestValidationCounters::default(),
        }
    }

    /// Restore counters from a checkpoint when resuming a run.
    pub fn with_statistics(alerts: Arc<dyn AlertService>, statistics: TraceabilityStatistics) -> Self {
        Self {
            alerts,
            metadata: statistics.metadata,
            objects: statistics.objects,
        }
    }

    /// Classify every replica's answer for one object and settle a verdict.
    pub fn validate(
        &mut self,
        kind: EntityKind,
        object_id: &str,
        authoritative_digest: &str,
        digest_by_replica: &BTreeMap<ReplicaId, Option<String>>,
    ) -> DigestValidationVerdict {
        let mut agreeing: Vec<ReplicaId> = Vec::new();
        let mut inconsistent: Vec<ReplicaId> = Vec::new();
        let mut missing: Vec<ReplicaId> = Vec::new();

        for (replica_id, digest) in digest_by_replica {
            match digest {
                None => missing.push(replica_id.clone()),
                Some(d) if d == authoritative_digest => agreeing.push(replica_id.clone()),
                Some(_) => inconsistent.push(replica_id.clone()),
            }
        }

        for replica_id in &missing {
            self.alerts.raise(
                AlertSeverity::Warning,
                &format!("Replica {} holds no copy of {}", replica_id, object_id),
            );
        }
        for replica_id in &inconsistent {
            let held = digest_by_replica[replica_id].as_deref().unwrap_or("");
            self.alerts.raise(
                AlertSeverity::Error,
                &format!(
                    "Replica {} disagrees on {}: expected {}, holds {}",
                    replica_id, object_id, authoritative_digest, held
                ),
            );
        }

        // A replica with no copy is tolerated; a replica actively holding a
        // different digest is not. Validity needs corroboration and zero
        // disagreement.
        let valid = !agreeing.is_empty() && inconsistent.is_empty();

        let counters = match kind {
            EntityKind::Metadata => &mut self.metadata,
            EntityKind::Object => &mut self.objects,
        };
        if valid {
            counters.valid_count += 1;
        } else {
            counters.inconsistent_count += 1;
        }

        debug!(
            "Digest verdict for {}: valid={} agreeing={} inconsistent={} missing={}",
            object_id,
            valid,
            agreeing.len(),
            inconsistent.len(),
            missing.len()
        );

        DigestValidationVerdict {
            object_id: object_id.to_string(),
            valid,
            authoritative_digest: authoritative_digest.to_string(),
            digest_by_replica: digest_by_replica.clone(),
            inconsistent_replicas: inconsistent,
            missing_replicas: missing,
        }
    }

    pub fn statistics(&self) -> TraceabilityStatistics {
        TraceabilityStatistics {
            metadata: self.metadata,
            objects: self.objects,
        }
    }

    pub fn has_inconsistencies(&self) -> bool {
        self.statistics().has_inconsistencies()
    }
}

/// Fetch per-replica digests for a whole chunk of objects, deduplicating the
/// configured replica list first. The client issues one bulk request per
/// replica.
pub async fn collect_replica_digests(
    client: &dyn ReplicaClient,
    category: DataCategory,
    replica_ids: &[ReplicaId],
    object_ids: &[String],
) -> Result<BulkDigestReport, TraceabilityError> {
    let mut deduplicated: Vec<ReplicaId> = Vec::with_capacity(replica_ids.len());
    for replica_id in replica_ids {
        if !deduplicated.contains(replica_id) {
            deduplicated.push(replica_id.clone());
        }
    }
    if deduplicated.is_empty() || object_ids.is_empty() {
        // Nothing to query; every object will settle as uncorroborated.
        return Ok(object_ids
            .iter()
            .map(|id| (id.clone(), BTreeMap::new()))
            .collect());
    }
    client.bulk_digests(category, &deduplicated, object_ids).await
}
