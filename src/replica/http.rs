//! HTTP replica client
//!
//! Queries every replica's bulk-digest endpoint concurrently and folds the
//! answers into one report. An unreachable replica fails the whole query as
//! a transient error so the surrounding orchestration can retry the chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::TraceabilityError;
use crate::model::{DataCategory, ReplicaId};
use crate::replica::{BulkDigestReport, ReplicaClient};

#[derive(Debug, Clone, Serialize)]
struct BulkDigestRequest {
    category: DataCategory,
    object_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BulkDigestResponse {
    /// Object id to digest; an object the replica does not hold is either
    /// absent from the map or explicitly null.
    digests: HashMap<String, Option<String>>,
}

pub struct HttpReplicaClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpReplicaClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, TraceabilityError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraceabilityError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn digests_url(&self, replica_id: &str) -> String {
        format!("{}/replicas/{}/digests", self.base_url, replica_id)
    }
}

#[async_trait]
impl ReplicaClient for HttpReplicaClient {
    async fn bulk_digests(
        &self,
        category: DataCategory,
        replica_ids: &[ReplicaId],
        object_ids: &[String],
    ) -> Result<BulkDigestReport, TraceabilityError> {
        let request = BulkDigestRequest {
            category,
            object_ids: object_ids.to_vec(),
        };

        let mut queries: JoinSet<Result<(ReplicaId, BulkDigestResponse), TraceabilityError>> =
            JoinSet::new();
        for replica_id in replica_ids {
            let replica_id = replica_id.clone();
            let url = self.digests_url(&replica_id);
            let http_client = self.http_client.clone();
            let request = request.clone();
            queries.spawn(async move {
                debug!(
                    "Bulk digest query to replica {} for {} objects",
                    replica_id,
                    request.object_ids.len()
                );
                let response = http_client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(|e| {
                        TraceabilityError::Transient(format!(
                            "Replica {} rejected bulk digest query: {}",
                            replica_id, e
                        ))
                    })?;
                let body: BulkDigestResponse = response.json().await?;
                Ok((replica_id, body))
            });
        }

        let mut by_replica: Vec<(ReplicaId, BulkDigestResponse)> = Vec::new();
        while let Some(joined) = queries.join_next().await {
            let result = joined
                .map_err(|e| TraceabilityError::Transient(format!("Replica query task: {}", e)))?;
            by_replica.push(result?);
        }

        let mut report: BulkDigestReport = HashMap::new();
        for object_id in object_ids {
            let mut per_replica: BTreeMap<ReplicaId, Option<String>> = BTreeMap::new();
            for (replica_id, response) in &by_replica {
                let digest = response.digests.get(object_id).cloned().flatten();
                per_replica.insert(replica_id.clone(), digest);
            }
            report.insert(object_id.clone(), per_replica);
        }
        Ok(report)
    }
}
