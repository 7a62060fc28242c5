use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hashes raw bytes with SHA-256 and returns lower-case hex (64 chars).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes the request digest used to detect a key reused with a new body.
///
/// The payload is serialized with `serde_json`, keeping object keys in the
/// order they were inserted (the crate enables `preserve_order`). The hash is
/// positional: `{"a":1,"b":2}` and `{"b":2,"a":1}` produce different digests.
/// An absent payload hashes the empty byte string, so it never collides with
/// an explicit `null`.
pub fn digest(payload: Option<&serde_json::Value>) -> String {
    match payload {
        Some(value) => digest_serializable(value).unwrap_or_else(|_| sha256_hex(b"")),
        None => sha256_hex(b""),
    }
}

/// Digest of any serializable value, in its serializer's field order.
pub fn digest_serializable<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(sha256_hex(&canonical))
}
