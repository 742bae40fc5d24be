//! Merkle Tree Builder/Verifier
//!
//! Summarizes an ordered batch of secured lines into a single root digest.
//! Leaf order is part of the committed value: shuffling leaves changes the
//! root even when the multiset of lines is identical.
//!
//! Pairing policy: internal nodes hash the concatenation of their two
//! children's raw digest bytes; an odd node at any level is carried up
//! unpaired. The same policy is applied on build and on audit-time
//! recomputation — a mismatch here would silently break every historical
//! verification.

use tracing::debug;

use crate::canonical::{CanonicalDigest, DigestAlgorithm, DigestWriter};

/// Preimage of the fixed root committed by a run that secured no entries.
const EMPTY_TREE_SENTINEL: &[u8] = b"EMPTY_TRACEABILITY_TREE";

/// Accumulates leaf digests in insertion order and derives the root.
pub struct MerkleAccumulator {
    algorithm: DigestAlgorithm,
    leaves: Vec<Vec<u8>>,
}

impl MerkleAccumulator {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            leaves: Vec::new(),
        }
    }

    /// Digest one secured line and append it as the next leaf.
    pub fn add_leaf(&mut self, line_bytes: &[u8]) {
        self.leaves.push(self.algorithm.hash(line_bytes));
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Derive the root over the accumulated leaves.
    ///
    /// An empty batch yields a fixed sentinel root rather than an error: an
    /// empty period is unusual but not erroneous, and the chain digest must
    /// stay well-defined.
    pub fn compute_root(&self) -> CanonicalDigest {
        if self.leaves.is_empty() {
            return CanonicalDigest::of_bytes(self.algorithm, EMPTY_TREE_SENTINEL);
        }

        let mut level: Vec<Vec<u8>> = self.leaves.clone();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
            let mut nodes = level.into_iter();
            while let Some(left) = nodes.next() {
                match nodes.next() {
                    Some(right) => {
                        let mut writer = DigestWriter::new(self.algorithm);
                        writer.update(&left);
                        writer.update(&right);
                        next.push(writer.finalize());
                    }
                    // Odd node: carried up unpaired.
                    None => next.push(left),
                }
            }
            level = next;
        }

        let root = CanonicalDigest {
            algorithm: self.algorithm,
            value: hex::encode(&level[0]),
        };
        debug!("Merkle root over {} leaves: {}", self.leaves.len(), root.value);
        root
    }
}

/// Rebuild a root from stored leaf lines and compare against an expected
/// value. Used both to confirm a freshly built tree before packaging and to
/// recompute from a persisted leaf log at audit time.
pub fn verify_leaves<'a, I>(
    lines: I,
    algorithm: DigestAlgorithm,
    expected_root: &str,
) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut accumulator = MerkleAccumulator::new(algorithm);
    for line in lines {
        accumulator.add_leaf(line);
    }
    accumulator.compute_root().value == expected_root
}
