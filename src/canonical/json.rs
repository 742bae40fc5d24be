//! Canonical JSON serialization
//!
//! Objects are written with keys sorted in byte order, no insignificant
//! whitespace, and serde_json's exact number/string rendering. Two
//! semantically equal records therefore always serialize to the same bytes,
//! whatever order their fields were stored in.

use serde_json::Value;

use crate::canonical::digest::{CanonicalDigest, DigestAlgorithm};
use crate::error::TraceabilityError;

/// Serialize a JSON value to its canonical byte form.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, TraceabilityError> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Canonicalize and digest a JSON value in one step.
pub fn canonical_digest(
    value: &Value,
    algorithm: DigestAlgorithm,
) -> Result<CanonicalDigest, TraceabilityError> {
    let bytes = canonicalize(value)?;
    Ok(CanonicalDigest::of_bytes(algorithm, &bytes))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), TraceabilityError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            // serde_json handles escaping; a scalar string cannot fail.
            let rendered = serde_json::to_vec(s)?;
            out.extend_from_slice(&rendered);
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let rendered = serde_json::to_vec(key)?;
                out.extend_from_slice(&rendered);
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
