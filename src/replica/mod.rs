//! Storage Replica Interface
//!
//! Replicas are independent storage backends each holding a copy of the same
//! logical object. The pipeline only ever asks them one question, in bulk:
//! for a category and a set of object ids, which digests do you hold?

pub mod http;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::error::TraceabilityError;
use crate::model::{DataCategory, ReplicaId};

pub use http::HttpReplicaClient;

/// Per object id, the digest each queried replica holds (`None` when the
/// replica has no copy).
pub type BulkDigestReport = HashMap<String, BTreeMap<ReplicaId, Option<String>>>;

/// Bulk digest queries against the configured replicas. One request per
/// replica per call, never one per object: round trips stay proportional to
/// chunk count, not entry count.
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    async fn bulk_digests(
        &self,
        category: DataCategory,
        replica_ids: &[ReplicaId],
        object_ids: &[String],
    ) -> Result<BulkDigestReport, TraceabilityError>;
}
