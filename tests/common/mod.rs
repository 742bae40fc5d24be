//! Shared fixtures for integration tests: an in-memory replica client and
//! instrumented timestamp authorities.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use traceability_engine::canonical::{canonical_digest, DigestAlgorithm};
use traceability_engine::config::EngineConfig;
use traceability_engine::error::TraceabilityError;
use traceability_engine::logstore::LogEntry;
use traceability_engine::model::{DataCategory, ReplicaId};
use traceability_engine::replica::{BulkDigestReport, ReplicaClient};
use traceability_engine::tsa::{
    LocalTimestampAuthority, MessageImprint, TimestampAuthority, TimestampSigner,
};

/// Replica fleet held in memory; tests seed exactly what each replica holds.
#[derive(Default)]
pub struct MemoryReplicaClient {
    digests: Mutex<HashMap<String, BTreeMap<ReplicaId, Option<String>>>>,
}

impl MemoryReplicaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, object_id: &str, replica_id: &str, digest: Option<String>) {
        self.digests
            .lock()
            .unwrap()
            .entry(object_id.to_string())
            .or_default()
            .insert(replica_id.to_string(), digest);
    }

    /// Seed every replica with the entry's authoritative canonical digest.
    pub fn seed_agreeing(&self, entry: &LogEntry, replica_ids: &[&str], algorithm: DigestAlgorithm) {
        let digest = canonical_digest(&entry.payload, algorithm).unwrap().value;
        for replica_id in replica_ids {
            self.set(&entry.id, replica_id, Some(digest.clone()));
        }
    }
}

#[async_trait]
impl ReplicaClient for MemoryReplicaClient {
    async fn bulk_digests(
        &self,
        _category: DataCategory,
        replica_ids: &[ReplicaId],
        object_ids: &[String],
    ) -> Result<BulkDigestReport, TraceabilityError> {
        let digests = self.digests.lock().unwrap();
        Ok(object_ids
            .iter()
            .map(|object_id| {
                let held = digests.get(object_id);
                let per_replica = replica_ids
                    .iter()
                    .map(|replica_id| {
                        let digest = held.and_then(|m| m.get(replica_id).cloned()).flatten();
                        (replica_id.clone(), digest)
                    })
                    .collect();
                (object_id.clone(), per_replica)
            })
            .collect())
    }
}

/// Local authority that counts issued tokens.
pub struct CountingAuthority {
    inner: LocalTimestampAuthority,
    calls: AtomicU32,
}

impl CountingAuthority {
    pub fn new(signer: TimestampSigner) -> Self {
        Self {
            inner: LocalTimestampAuthority::new(signer),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimestampAuthority for CountingAuthority {
    async fn sign_digest(&self, imprint: &MessageImprint) -> Result<Vec<u8>, TraceabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_digest(imprint).await
    }
}

/// Authority that is always unreachable.
pub struct UnreachableAuthority;

#[async_trait]
impl TimestampAuthority for UnreachableAuthority {
    async fn sign_digest(&self, _imprint: &MessageImprint) -> Result<Vec<u8>, TraceabilityError> {
        Err(TraceabilityError::Transient(
            "timestamp authority unreachable".to_string(),
        ))
    }
}

/// Engine configuration tuned for tests: small chunks, no temporization.
pub fn test_config(package_root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.digest_algorithm = DigestAlgorithm::Sha256;
    config.replica_ids = vec!["r1".to_string(), "r2".to_string()];
    config.package_root = package_root.to_path_buf();
    config.chunk_size = 2;
    config.temporization_delay_secs = 0;
    config.retry_attempts = 2;
    config
}
