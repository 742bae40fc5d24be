//! Timestamp token verification
//!
//! Three independent checks, reported distinctly because they indicate
//! different failure modes: an imprint mismatch means the committed data was
//! tampered with, a bad signature or substituted certificate means the
//! authority credential is broken or forged.

use secp256k1::Secp256k1;
use tracing::debug;

use crate::error::VerificationError;
use crate::tsa::token::{parse_signature, signing_message, MessageImprint, TimestampToken};

/// Validate a stored token against the imprint recomputed from the run's
/// persisted artifacts.
///
/// The imprint comparison runs first: mutated chain inputs must surface as a
/// digest mismatch, not as a signature failure.
pub fn verify_token(
    token_bytes: &[u8],
    expected_imprint: &MessageImprint,
) -> Result<TimestampToken, VerificationError> {
    let token = TimestampToken::from_bytes(token_bytes)
        .map_err(|e| VerificationError::TokenDecode(e.to_string()))?;

    let imprint = &token.signed_attributes.message_imprint;
    if imprint != expected_imprint {
        return Err(VerificationError::DigestMismatch {
            expected: expected_imprint.digest.clone(),
            actual: imprint.digest.clone(),
        });
    }

    let message = signing_message(&token.signed_attributes)
        .map_err(|e| VerificationError::TokenDecode(e.to_string()))?;
    let signature =
        parse_signature(&token.signature).map_err(VerificationError::InvalidSignature)?;
    let public_key = token
        .certificate
        .parsed_public_key()
        .map_err(|e| VerificationError::TokenDecode(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &public_key)
        .map_err(|e| VerificationError::InvalidSignature(e.to_string()))?;

    // The certificate that verified the signature must be the one asserted
    // under the signature, otherwise a substituted key could re-sign.
    let certificate_hash = token
        .certificate
        .hash(imprint.algorithm)
        .map_err(|e| VerificationError::TokenDecode(e.to_string()))?;
    if certificate_hash != token.signed_attributes.certificate_hash {
        return Err(VerificationError::CertificateMismatch);
    }

    debug!(
        "Timestamp token verified: imprint {} signed at {}",
        imprint.digest, token.signed_attributes.gen_time
    );
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CanonicalDigest, DigestAlgorithm};
    use crate::chain::PeriodChainTokens;
    use crate::tsa::client::chain_imprint;
    use crate::tsa::token::TimestampSigner;
    use chrono::Utc;

    fn root() -> CanonicalDigest {
        CanonicalDigest {
            algorithm: DigestAlgorithm::Sha256,
            value: "34".repeat(32),
        }
    }

    fn chain() -> PeriodChainTokens {
        PeriodChainTokens {
            previous: Some(b"tok-prev".to_vec()),
            previous_month: None,
            previous_year: Some(b"tok-year".to_vec()),
        }
    }

    #[test]
    fn test_round_trip_verification() {
        let signer = TimestampSigner::generate("test-authority");
        let imprint = chain_imprint(&root(), &chain());
        let token_bytes = signer.sign(imprint.clone(), Utc::now()).unwrap().to_bytes().unwrap();

        let token = verify_token(&token_bytes, &imprint).unwrap();
        assert_eq!(token.certificate.subject, "test-authority");
    }

    #[test]
    fn test_mutated_root_is_a_digest_mismatch() {
        let signer = TimestampSigner::generate("test-authority");
        let imprint = chain_imprint(&root(), &chain());
        let token_bytes = signer.sign(imprint, Utc::now()).unwrap().to_bytes().unwrap();

        let mut mutated_root = root();
        mutated_root.value.replace_range(0..1, "0");
        let recomputed = chain_imprint(&mutated_root, &chain());

        let err = verify_token(&token_bytes, &recomputed).unwrap_err();
        assert!(matches!(err, VerificationError::DigestMismatch { .. }));
    }

    #[test]
    fn test_mutated_chain_token_is_a_digest_mismatch() {
        let signer = TimestampSigner::generate("test-authority");
        let imprint = chain_imprint(&root(), &chain());
        let token_bytes = signer.sign(imprint, Utc::now()).unwrap().to_bytes().unwrap();

        let mut tampered = chain();
        tampered.previous.as_mut().unwrap()[0] ^= 0x01;
        let recomputed = chain_imprint(&root(), &tampered);

        let err = verify_token(&token_bytes, &recomputed).unwrap_err();
        // A single mutated byte in a chain input must surface as a digest
        // mismatch, not a signature error.
        assert!(matches!(err, VerificationError::DigestMismatch { .. }));
    }

    #[test]
    fn test_tampered_signature_is_invalid() {
        let signer = TimestampSigner::generate("test-authority");
        let imprint = chain_imprint(&root(), &chain());
        let mut token = signer.sign(imprint.clone(), Utc::now()).unwrap();

        let mut raw = hex::decode(&token.signature).unwrap();
        raw[10] ^= 0xff;
        token.signature = hex::encode(raw);

        let err = verify_token(&token.to_bytes().unwrap(), &imprint).unwrap_err();
        assert!(matches!(err, VerificationError::InvalidSignature(_)));
    }

    #[test]
    fn test_substituted_certificate_is_detected() {
        let signer = TimestampSigner::generate("test-authority");
        let attacker = TimestampSigner::generate("test-authority");

        let imprint = chain_imprint(&root(), &chain());
        let genuine = signer.sign(imprint.clone(), Utc::now()).unwrap();
        // Re-sign the genuine attributes with another key: the signature
        // verifies under the embedded certificate, but the certificate hash
        // asserted inside the signed attributes still names the real signer.
        let forged = attacker
            .sign_attributes(genuine.signed_attributes.clone())
            .unwrap();

        let err = verify_token(&forged.to_bytes().unwrap(), &imprint).unwrap_err();
        assert!(matches!(err, VerificationError::CertificateMismatch));
    }

    #[test]
    fn test_garbage_token_fails_to_decode() {
        let imprint = chain_imprint(&root(), &chain());
        let err = verify_token(b"not a token", &imprint).unwrap_err();
        assert!(matches!(err, VerificationError::TokenDecode(_)));
    }
}
