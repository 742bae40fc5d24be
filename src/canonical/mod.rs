//! Canonical Digest Codec
//!
//! Every hash in the system is computed over a canonical byte serialization
//! so that the same logical record always digests identically, regardless of
//! field ordering or formatting in its stored representation.

pub mod digest;
pub mod json;

pub use digest::{CanonicalDigest, DigestAlgorithm, DigestWriter};
pub use json::{canonical_digest, canonicalize};
