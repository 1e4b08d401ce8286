//! Hashing and signature verification primitives.
//!
//! Keymint stores no reversible secrets. The admin API key is kept as a
//! salted SHA-256 digest, and inbound webhook payloads are authenticated
//! with HMAC-SHA256 over the raw body.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hash a secret for storage and lookup (admin API keys).
/// Uses SHA-256 with application salt, returns lowercase hex string.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"keymint-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a presented secret against a stored `hash_secret` digest.
///
/// Comparison is constant-time so response timing does not leak how many
/// digest bytes matched.
pub fn verify_secret(presented: &str, stored_hash: &str) -> bool {
    let computed = hash_secret(presented);

    let computed_bytes = computed.as_bytes();
    let stored_bytes = stored_hash.as_bytes();

    // Length check is not constant-time, but digest length is fixed and
    // not secret (always 64 hex chars for SHA-256).
    if computed_bytes.len() != stored_bytes.len() {
        return false;
    }

    computed_bytes.ct_eq(stored_bytes).into()
}

/// Verify an HMAC-SHA256 webhook signature (lowercase hex) over the raw
/// request body.
///
/// Gumroad signs the exact bytes it sends, so this must run before any
/// body parsing or re-serialization.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided = signature.trim().to_ascii_lowercase();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}
