//! Timestamp Authority Integration
//!
//! Packages a run's Merkle root and its period-chain tokens into a single
//! message imprint, obtains a signed, dated token over it from a timestamp
//! authority, and later re-derives the same imprint to validate a stored
//! token's signature and embedded certificate.

pub mod client;
pub mod token;
pub mod verify;

pub use client::{
    chain_imprint, HttpTimestampAuthority, LocalTimestampAuthority, TimestampAuthority,
    ABSENT_TOKEN_MARKER,
};
pub use token::{AuthorityCertificate, MessageImprint, SignedAttributes, TimestampSigner, TimestampToken};
pub use verify::verify_token;
