//! Timestamp authority clients and chain-imprint derivation
//!
//! The four chain inputs are combined into one digest in a fixed order:
//! Merkle root, previous token, previous-month token, previous-year token.
//! An absent token is hashed as an explicit marker, never silently omitted,
//! so the chain digest stays well-defined for first and boundary runs.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::canonical::{CanonicalDigest, DigestWriter};
use crate::chain::PeriodChainTokens;
use crate::error::TraceabilityError;
use crate::tsa::token::{MessageImprint, TimestampSigner};

/// Marker hashed in place of an absent chain token.
pub const ABSENT_TOKEN_MARKER: &str = "null";

fn token_or_marker(token: &Option<Vec<u8>>) -> String {
    match token {
        Some(bytes) => STANDARD.encode(bytes),
        None => ABSENT_TOKEN_MARKER.to_string(),
    }
}

/// Derive the message imprint binding a run's root to its period chain.
///
/// Deterministic: issue and verify both call this and must agree byte for
/// byte.
pub fn chain_imprint(root: &CanonicalDigest, chain: &PeriodChainTokens) -> MessageImprint {
    let mut writer = DigestWriter::new(root.algorithm);
    writer.update(root.value.as_bytes());
    writer.update(token_or_marker(&chain.previous).as_bytes());
    writer.update(token_or_marker(&chain.previous_month).as_bytes());
    writer.update(token_or_marker(&chain.previous_year).as_bytes());
    MessageImprint {
        algorithm: root.algorithm,
        digest: hex::encode(writer.finalize()),
    }
}

/// External signing authority: "sign this digest".
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    async fn sign_digest(&self, imprint: &MessageImprint) -> Result<Vec<u8>, TraceabilityError>;
}

/// Authority backed by an in-process signer and its keystore.
pub struct LocalTimestampAuthority {
    signer: TimestampSigner,
}

impl LocalTimestampAuthority {
    pub fn new(signer: TimestampSigner) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl TimestampAuthority for LocalTimestampAuthority {
    async fn sign_digest(&self, imprint: &MessageImprint) -> Result<Vec<u8>, TraceabilityError> {
        let token = self.signer.sign(imprint.clone(), Utc::now())?;
        debug!("Issued local timestamp token for imprint {}", imprint.digest);
        token.to_bytes()
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    algorithm: &'a str,
    digest: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    /// Raw signed token bytes, base64 encoded.
    token: String,
}

/// Remote authority spoken to over HTTP. Calls are single short requests
/// with a timeout; a timeout surfaces as transient so the run can re-issue
/// without rebuilding.
pub struct HttpTimestampAuthority {
    url: String,
    http_client: reqwest::Client,
}

impl HttpTimestampAuthority {
    pub fn new(url: String, timeout: Duration) -> Result<Self, TraceabilityError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraceabilityError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { url, http_client })
    }
}

#[async_trait]
impl TimestampAuthority for HttpTimestampAuthority {
    async fn sign_digest(&self, imprint: &MessageImprint) -> Result<Vec<u8>, TraceabilityError> {
        info!("Requesting timestamp token from {}", self.url);
        let response = self
            .http_client
            .post(&self.url)
            .json(&SignRequest {
                algorithm: imprint.algorithm.name(),
                digest: &imprint.digest,
            })
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                TraceabilityError::Transient(format!("Timestamp authority rejected request: {}", e))
            })?;
        let body: SignResponse = response.json().await?;
        STANDARD
            .decode(body.token.as_bytes())
            .map_err(|e| TraceabilityError::Fatal(format!("Authority returned malformed token: {}", e)))
    }
}
