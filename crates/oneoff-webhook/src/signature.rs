//! HMAC-SHA256 payload signatures.
//!
//! The signature is computed over the exact payload bytes sent on the wire
//! and travels as `X-OneOff-Signature: sha256=<hex>`. Verification
//! recomputes the HMAC and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header value prefix for the signature scheme.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the lowercase hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds the full `X-OneOff-Signature` header value.
pub fn signature_header(payload: &[u8], secret: &str) -> String {
    format!("{SIGNATURE_PREFIX}{}", sign_payload(payload, secret))
}

/// Verifies a received signature against the payload and secret.
///
/// Accepts the value with or without the `sha256=` prefix. Comparison is
/// constant time so receivers can use this directly.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let hex_signature = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let expected = sign_payload(payload, secret);
    timing_safe_eq(hex_signature, &expected)
}

/// Constant-time string comparison.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }
    result == 0
}
