//! Traceability Run Orchestrator
//!
//! Drives the end-to-end build (select entries, reconcile digests, build the
//! Merkle tree, resolve the period chain, obtain a token, persist) and the
//! symmetric verification path, with idempotent, resumable semantics. Run
//! state is owned exclusively by the orchestrator; concurrent runs of the
//! same log type are prevented upstream.

pub mod artifacts;
pub mod build;
pub mod verify;

use serde::{Deserialize, Serialize};

pub use artifacts::{ComputingInformation, MerkleDescriptor, RunCursor, RunPackage};
pub use build::TraceabilityEngine;
pub use verify::{verify_package, VerificationReport};

/// Explicit per-run context threaded through the pipeline instead of any
/// ambient or global session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub tenant: u32,
    pub request_id: String,
}

impl RunContext {
    pub fn new(tenant: u32) -> Self {
        Self {
            tenant,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Build-path progress persisted in the resume cursor. Transitions are
/// sequential; failure exits jump straight to a terminal failure without
/// advancing the phase, so a retry resumes where the run left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    /// Streaming entries into the leaf log and the Merkle accumulator.
    Selecting,
    /// All leaves folded; Merkle descriptor persisted.
    TreeBuilt,
    /// Period chain resolved and persisted; token not yet issued.
    Chained,
    /// Token persisted; completion records may still be pending.
    TokenIssued { event_appended: bool },
}
