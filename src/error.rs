use thiserror::Error;

impl From<serde_json::Error> for TraceabilityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fatal(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for TraceabilityError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(format!("HTTP transport error: {}", err))
    }
}

/// Error taxonomy for the secure-logging pipeline.
///
/// `Integrity` and `Fatal` are terminal for a run and never retried
/// automatically. `Transient` failures may be retried a bounded number of
/// times without corrupting resumable state.
#[derive(Error, Debug)]
pub enum TraceabilityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data integrity failure for {object_id}: {detail}")]
    Integrity { object_id: String, detail: String },

    #[error("Transient infrastructure failure: {0}")]
    Transient(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Log store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceabilityError {
    /// True when the surrounding orchestration may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn integrity(object_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Integrity {
            object_id: object_id.into(),
            detail: detail.into(),
        }
    }
}

/// Failures raised while verifying a persisted traceability run.
///
/// Digest mismatches and signature/certificate problems are reported as
/// distinct variants: the former indicates tampering with the committed
/// data, the latter a broken or substituted authority credential.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Run artifact missing or unreadable: {0}")]
    MissingArtifact(String),

    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Merkle root mismatch: committed {committed}, recomputed {recomputed}")]
    RootMismatch { committed: String, recomputed: String },

    #[error("Timestamp token signature is invalid: {0}")]
    InvalidSignature(String),

    #[error("Signing certificate hash does not match the signed attributes")]
    CertificateMismatch,

    #[error("Timestamp token could not be decoded: {0}")]
    TokenDecode(String),

    #[error("Stored timestamp token differs from the token recorded in the run summary")]
    TokenSummaryMismatch,
}
