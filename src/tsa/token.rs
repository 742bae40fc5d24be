//! Timestamp token structures and the signing side of the authority
//!
//! A token binds a message imprint, a generation time and the hash of the
//! signing certificate inside the signed attributes; the certificate itself
//! travels with the token so verification needs no external key material.
//! The byte encoding of a token is its canonical JSON form; the crate never
//! parses foreign ASN.1.

use chrono::{DateTime, Utc};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::canonical::{canonicalize, DigestAlgorithm};
use crate::error::TraceabilityError;

/// Digest the authority attests to: algorithm plus hex digest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageImprint {
    pub algorithm: DigestAlgorithm,
    pub digest: String,
}

/// Attributes covered by the token signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttributes {
    pub message_imprint: MessageImprint,
    pub gen_time: DateTime<Utc>,
    /// Hash of the signing certificate, asserted under the signature as a
    /// defense against certificate substitution.
    pub certificate_hash: String,
}

/// Self-describing signer certificate embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityCertificate {
    pub subject: String,
    pub serial: String,
    /// Compressed secp256k1 public key, hex encoded.
    pub public_key: String,
}

impl AuthorityCertificate {
    /// Hash of the certificate's canonical byte form under `algorithm`.
    pub fn hash(&self, algorithm: DigestAlgorithm) -> Result<String, TraceabilityError> {
        let value = serde_json::to_value(self)?;
        let bytes = canonicalize(&value)?;
        Ok(hex::encode(algorithm.hash(&bytes)))
    }

    pub fn parsed_public_key(&self) -> Result<PublicKey, TraceabilityError> {
        let bytes = hex::decode(&self.public_key)
            .map_err(|e| TraceabilityError::Fatal(format!("Invalid certificate key hex: {}", e)))?;
        PublicKey::from_slice(&bytes)
            .map_err(|e| TraceabilityError::Fatal(format!("Invalid certificate key: {}", e)))
    }
}

/// An opaque signed structure binding a digest, a timestamp and a signer
/// certificate. Issued once per run; verified any number of times later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    pub signed_attributes: SignedAttributes,
    pub certificate: AuthorityCertificate,
    /// Compact ECDSA signature over the canonical signed attributes, hex.
    pub signature: String,
}

impl TimestampToken {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TraceabilityError> {
        let value = serde_json::to_value(self)?;
        canonicalize(&value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Message actually signed: SHA-256 over the canonical signed attributes.
/// Fixed independently of the imprint algorithm because the curve takes a
/// 32-byte challenge.
pub(crate) fn signing_message(attributes: &SignedAttributes) -> Result<Message, TraceabilityError> {
    let value = serde_json::to_value(attributes)?;
    let bytes = canonicalize(&value)?;
    let hash = DigestAlgorithm::Sha256.hash(&bytes);
    Message::from_digest_slice(&hash)
        .map_err(|e| TraceabilityError::Fatal(format!("Invalid signing message: {}", e)))
}

#[derive(Serialize, Deserialize)]
struct Keystore {
    subject: String,
    serial: String,
    secret_key: String,
}

/// In-process signing authority backed by a keystore file.
#[derive(Debug)]
pub struct TimestampSigner {
    secret_key: SecretKey,
    certificate: AuthorityCertificate,
    secp: Secp256k1<All>,
}

impl TimestampSigner {
    /// Generate a fresh signing identity.
    pub fn generate(subject: &str) -> Self {
        use secp256k1::rand::rngs::OsRng;

        let secp = Secp256k1::new();
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let certificate = AuthorityCertificate {
            subject: subject.to_string(),
            serial: uuid::Uuid::new_v4().to_string(),
            public_key: hex::encode(public_key.serialize()),
        };
        Self {
            secret_key,
            certificate,
            secp,
        }
    }

    /// Load the signing identity from a keystore file.
    pub fn from_keystore(path: &Path) -> Result<Self, TraceabilityError> {
        let content = std::fs::read_to_string(path)?;
        let keystore: Keystore = serde_json::from_str(&content)
            .map_err(|e| TraceabilityError::Config(format!("Invalid keystore {}: {}", path.display(), e)))?;

        let secret_bytes = hex::decode(&keystore.secret_key)
            .map_err(|e| TraceabilityError::Config(format!("Invalid keystore key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| TraceabilityError::Config(format!("Invalid keystore key: {}", e)))?;

        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let certificate = AuthorityCertificate {
            subject: keystore.subject,
            serial: keystore.serial,
            public_key: hex::encode(public_key.serialize()),
        };
        Ok(Self {
            secret_key,
            certificate,
            secp,
        })
    }

    /// Persist the signing identity so restarts keep the same certificate.
    pub fn write_keystore(&self, path: &Path) -> Result<(), TraceabilityError> {
        let keystore = Keystore {
            subject: self.certificate.subject.clone(),
            serial: self.certificate.serial.clone(),
            secret_key: hex::encode(self.secret_key.secret_bytes()),
        };
        std::fs::write(path, serde_json::to_string_pretty(&keystore)?)?;
        Ok(())
    }

    pub fn certificate(&self) -> &AuthorityCertificate {
        &self.certificate
    }

    /// Sign a message imprint at `gen_time`.
    pub fn sign(
        &self,
        imprint: MessageImprint,
        gen_time: DateTime<Utc>,
    ) -> Result<TimestampToken, TraceabilityError> {
        let certificate_hash = self.certificate.hash(imprint.algorithm)?;
        self.sign_attributes(SignedAttributes {
            message_imprint: imprint,
            gen_time,
            certificate_hash,
        })
    }

    /// Sign a fully formed attribute set as-is.
    pub(crate) fn sign_attributes(
        &self,
        signed_attributes: SignedAttributes,
    ) -> Result<TimestampToken, TraceabilityError> {
        let message = signing_message(&signed_attributes)?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        Ok(TimestampToken {
            signed_attributes,
            certificate: self.certificate.clone(),
            signature: hex::encode(signature.serialize_compact()),
        })
    }
}

pub(crate) fn parse_signature(hex_signature: &str) -> Result<Signature, String> {
    let bytes = hex::decode(hex_signature).map_err(|e| format!("signature hex: {}", e))?;
    Signature::from_compact(&bytes).map_err(|e| format!("signature encoding: {}", e))
}
