//! Verification path of the traceability orchestrator
//!
//! Recomputes everything a build committed to from the persisted artifacts
//! alone: the Merkle root from the leaf log, the chain imprint from the
//! computing information, and the token's validity against both. Read-only
//! and safe to run concurrently across unrelated runs; losing any artifact
//! is a defined terminal condition, never a silent pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::canonical::CanonicalDigest;
use crate::error::{TraceabilityError, VerificationError};
use crate::merkle::MerkleAccumulator;
use crate::model::RunStatus;
use crate::run::artifacts::RunPackage;
use crate::tsa::{chain_imprint, verify_token};

/// Verification progress, recorded so a failed verdict names the phase that
/// rejected the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyState {
    Fetching,
    TreeRecomputed,
    ChainRecomputed,
    TokenChecked,
    Verdict,
}

/// Pass/fail judgment over one persisted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub run_id: String,
    pub status: RunStatus,
    pub state_reached: VerifyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    pub leaf_count: u64,
}

/// Verify a persisted run package and render the judgment as a report.
pub fn verify_package(package: &RunPackage) -> VerificationReport {
    let mut state = VerifyState::Fetching;
    match check(package, &mut state) {
        Ok(verified) => {
            info!("Run {} verified: root {}", package.id(), verified.root_hash);
            VerificationReport {
                run_id: package.id().to_string(),
                status: RunStatus::Ok,
                state_reached: VerifyState::Verdict,
                reason: None,
                root_hash: Some(verified.root_hash),
                signed_at: Some(verified.signed_at),
                leaf_count: verified.leaf_count,
            }
        }
        Err(err) => VerificationReport {
            run_id: package.id().to_string(),
            status: RunStatus::Ko,
            state_reached: state,
            reason: Some(err.to_string()),
            root_hash: None,
            signed_at: None,
            leaf_count: 0,
        },
    }
}

struct VerifiedRun {
    root_hash: String,
    signed_at: DateTime<Utc>,
    leaf_count: u64,
}

fn unreadable(err: TraceabilityError) -> VerificationError {
    VerificationError::MissingArtifact(err.to_string())
}

fn check(package: &RunPackage, state: &mut VerifyState) -> Result<VerifiedRun, VerificationError> {
    // FETCHING: all artifacts must be retrievable together.
    if !package.leaf_file_exists() {
        return Err(VerificationError::MissingArtifact(format!(
            "leaf log {}",
            package.leaf_file_name()
        )));
    }
    let leaves = package.load_leaf_lines().map_err(unreadable)?;
    let merkle = package
        .load_merkle()
        .map_err(unreadable)?
        .ok_or_else(|| VerificationError::MissingArtifact("Merkle descriptor".to_string()))?;
    let computing = package
        .load_computing()
        .map_err(unreadable)?
        .ok_or_else(|| VerificationError::MissingArtifact("computing information".to_string()))?;
    let token_bytes = package
        .load_token()
        .map_err(unreadable)?
        .ok_or_else(|| VerificationError::MissingArtifact("timestamp token".to_string()))?;
    let event = package
        .load_event()
        .map_err(unreadable)?
        .ok_or_else(|| VerificationError::MissingArtifact("run summary".to_string()))?;
    *state = VerifyState::TreeRecomputed;

    // TREE_RECOMPUTED: the leaf log must fold back to the committed root.
    let mut accumulator = MerkleAccumulator::new(merkle.algorithm);
    for line in &leaves {
        accumulator.add_leaf(line);
    }
    let recomputed = accumulator.compute_root();
    if recomputed.value != merkle.root {
        return Err(VerificationError::RootMismatch {
            committed: merkle.root,
            recomputed: recomputed.value,
        });
    }
    if event.root_hash != merkle.root {
        return Err(VerificationError::RootMismatch {
            committed: event.root_hash,
            recomputed: merkle.root,
        });
    }
    if computing.root_hash != merkle.root {
        return Err(VerificationError::RootMismatch {
            committed: computing.root_hash,
            recomputed: merkle.root,
        });
    }
    *state = VerifyState::ChainRecomputed;

    // CHAIN_RECOMPUTED: re-derive the imprint the authority signed.
    let chain = computing.chain_tokens().map_err(unreadable)?;
    let root = CanonicalDigest {
        algorithm: merkle.algorithm,
        value: merkle.root.clone(),
    };
    let imprint = chain_imprint(&root, &chain);
    *state = VerifyState::TokenChecked;

    // TOKEN_CHECKED: the stored token must match the summary and validate
    // against the recomputed imprint.
    if token_bytes != event.timestamp_token {
        return Err(VerificationError::TokenSummaryMismatch);
    }
    let token = verify_token(&token_bytes, &imprint)?;
    *state = VerifyState::Verdict;

    Ok(VerifiedRun {
        root_hash: merkle.root,
        signed_at: token.signed_attributes.gen_time,
        leaf_count: accumulator.leaf_count(),
    })
}
