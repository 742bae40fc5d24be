//! Engine configuration
//!
//! Layered from an optional `traceability` config file and
//! `TRACEABILITY_`-prefixed environment variables. The digest algorithm
//! chosen here is recorded in every persisted artifact, so changing it
//! never invalidates historical runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::canonical::DigestAlgorithm;
use crate::error::TraceabilityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Digest algorithm for canonical digests, Merkle nodes and imprints.
    #[serde(default = "default_digest_algorithm")]
    pub digest_algorithm: DigestAlgorithm,

    /// Storage replicas cross-validated on every run.
    #[serde(default)]
    pub replica_ids: Vec<String>,

    /// Base URL of the replica digest service.
    #[serde(default)]
    pub replica_base_url: Option<String>,

    /// Remote timestamp authority endpoint; when unset, tokens are signed
    /// with the local keystore.
    #[serde(default)]
    pub authority_url: Option<String>,

    /// Keystore file for the local signing authority.
    #[serde(default)]
    pub keystore_path: Option<PathBuf>,

    /// Root directory of the file-backed log store.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Directory receiving one package per run.
    #[serde(default = "default_package_root")]
    pub package_root: PathBuf,

    /// Entries fetched and reconciled per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Cap on entries per run; reaching it narrows the committed period.
    #[serde(default = "default_max_entries_per_run")]
    pub max_entries_per_run: u64,

    /// Seconds subtracted from "now" when closing the selection window, so
    /// late-arriving entries land in the next period instead of being lost.
    #[serde(default = "default_temporization_delay_secs")]
    pub temporization_delay_secs: i64,

    /// Timeout for replica and authority requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Bounded retries for transient failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_digest_algorithm() -> DigestAlgorithm {
    DigestAlgorithm::Sha512
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data/logstore")
}

fn default_package_root() -> PathBuf {
    PathBuf::from("data/runs")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_max_entries_per_run() -> u64 {
    100_000
}

fn default_temporization_delay_secs() -> i64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are complete")
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, TraceabilityError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("traceability").required(false))
            .add_source(config::Environment::with_prefix("TRACEABILITY"))
            .build()
            .map_err(|e| TraceabilityError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| TraceabilityError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), TraceabilityError> {
        if self.chunk_size == 0 {
            return Err(TraceabilityError::Config("chunk_size must be positive".to_string()));
        }
        if self.max_entries_per_run == 0 {
            return Err(TraceabilityError::Config(
                "max_entries_per_run must be positive".to_string(),
            ));
        }
        if self.temporization_delay_secs < 0 {
            return Err(TraceabilityError::Config(
                "temporization_delay_secs cannot be negative".to_string(),
            ));
        }
        if self.authority_url.is_none() && self.keystore_path.is_none() {
            return Err(TraceabilityError::Config(
                "either authority_url or keystore_path must be set".to_string(),
            ));
        }
        Ok(())
    }
}
