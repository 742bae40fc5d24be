//! Core data model for traceability runs
//!
//! Everything persisted by a run is defined here: the log-type dispatch
//! table, the per-run summary event, validation statistics and the secured
//! leaf-line format. No entity is ever updated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::DigestAlgorithm;

/// Storage category used when querying replicas for an object's digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataCategory {
    #[serde(rename = "logbook")]
    OperationLog,
    #[serde(rename = "unit")]
    Unit,
    #[serde(rename = "objectgroup")]
    ObjectGroup,
    #[serde(rename = "storagelog")]
    StorageLog,
    /// Binary objects referenced by an object-group lifecycle.
    #[serde(rename = "object")]
    Object,
}

impl DataCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OperationLog => "logbook",
            Self::Unit => "unit",
            Self::ObjectGroup => "objectgroup",
            Self::StorageLog => "storagelog",
            Self::Object => "object",
        }
    }
}

/// Closed set of securable log types.
///
/// Each variant routes canonicalization and replica queries; behavior is a
/// table of pure functions rather than virtual dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    #[serde(rename = "OPERATION")]
    Operation,
    #[serde(rename = "UNIT_LIFECYCLE")]
    UnitLifecycle,
    #[serde(rename = "OBJECTGROUP_LIFECYCLE")]
    ObjectGroupLifecycle,
    #[serde(rename = "STORAGE")]
    Storage,
}

impl LogType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Operation => "OPERATION",
            Self::UnitLifecycle => "UNIT_LIFECYCLE",
            Self::ObjectGroupLifecycle => "OBJECTGROUP_LIFECYCLE",
            Self::Storage => "STORAGE",
        }
    }

    /// Category replicas are queried under for this log type.
    pub fn data_category(&self) -> DataCategory {
        match self {
            Self::Operation => DataCategory::OperationLog,
            Self::UnitLifecycle => DataCategory::Unit,
            Self::ObjectGroupLifecycle => DataCategory::ObjectGroup,
            Self::Storage => DataCategory::StorageLog,
        }
    }

    /// Lifecycle types secure two digests per record: the full record and
    /// its event list hashed as a single aggregate.
    pub fn digests_event_aggregate(&self) -> bool {
        matches!(self, Self::UnitLifecycle | Self::ObjectGroupLifecycle)
    }
}

impl std::str::FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPERATION" => Ok(Self::Operation),
            "UNIT_LIFECYCLE" | "UNIT" => Ok(Self::UnitLifecycle),
            "OBJECTGROUP_LIFECYCLE" | "OBJECTGROUP" => Ok(Self::ObjectGroupLifecycle),
            "STORAGE" => Ok(Self::Storage),
            other => Err(format!("Unknown log type: {}", other)),
        }
    }
}

/// Fixed start date for the very first run of a log type.
pub fn initial_start_date() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
}

/// Identifier of a storage replica.
pub type ReplicaId = String;

/// Per-entity-kind digest validation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestValidationCounters {
    pub valid_count: u64,
    pub inconsistent_count: u64,
}

/// Run-level validation statistics, split between metadata records and
/// binary objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityStatistics {
    pub metadata: DigestValidationCounters,
    pub objects: DigestValidationCounters,
}

impl TraceabilityStatistics {
    pub fn has_inconsistencies(&self) -> bool {
        self.metadata.inconsistent_count > 0 || self.objects.inconsistent_count > 0
    }
}

/// Replica digest detail kept on a secured line when reconciliation found
/// a problem worth auditing later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDigestDetail {
    pub replica_ids: Vec<ReplicaId>,
    pub authoritative_digest: String,
    pub digest_by_replica: BTreeMap<ReplicaId, Option<String>>,
}

/// Reconciled digest of one binary object referenced by a secured record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDigestEntry {
    pub object_id: String,
    pub storage_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_detail: Option<ReplicaDigestDetail>,
}

/// One line of the secured leaf log.
///
/// The canonical byte form of this structure is both the Merkle leaf input
/// and the exact content persisted to the leaf file, so audit-time
/// recomputation starts from the same bytes the run committed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureLogLine {
    pub entry_id: String,
    pub entry_timestamp: DateTime<Utc>,
    pub record_digest: String,
    /// Digest of the record's event list as one aggregate; lifecycle types only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_digest: Option<String>,
    /// Authoritative storage digest, or the invalid marker when no replica
    /// corroborated it.
    pub storage_digest: String,
    /// Populated only when reconciliation saw a missing or disagreeing replica.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_detail: Option<ReplicaDigestDetail>,
    /// Binary-object digests; object-group lifecycles only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_digests: Option<Vec<ObjectDigestEntry>>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Durable summary of one completed traceability run.
///
/// Appended to the log store once the run package is persisted, so the next
/// run of the same type secures it like any other entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityEvent {
    pub log_type: LogType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub digest_algorithm: DigestAlgorithm,
    /// Merkle root over the secured leaf lines, hex encoded.
    pub root_hash: String,
    /// Name of the persisted leaf file within the run package.
    pub file_name: String,
    /// Raw signed timestamp token bytes.
    #[serde(with = "base64_bytes")]
    pub timestamp_token: Vec<u8>,
    pub number_of_entries: u64,
    pub max_entries_reached: bool,
    pub statistics: TraceabilityStatistics,
}

/// A traceability event together with the identifier the log store assigned
/// to it, needed to avoid chaining the same token twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTraceabilityEvent {
    pub event_id: String,
    pub event: TraceabilityEvent,
}

/// Final status of a run, mirroring the outcome taxonomy: policy outcomes
/// are warnings, integrity failures are KO, unrecoverable errors are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Ok,
    Warning,
    Ko,
    Fatal,
}

/// Report attached to every run, successful or not. Failures are recorded
/// here as well as logged: the trail itself must explain why a period is
/// missing or invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub log_type: LogType,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub number_of_entries: u64,
    pub max_entries_reached: bool,
    pub statistics: TraceabilityStatistics,
}
