//! Challenge/response digest for the connection handshake.
//!
//! The server sends a fresh nonce, the client answers with
//! `hex(SHA-256(secret || nonce))`. Comparison ignores ASCII case so clients
//! may answer in either hex casing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Number of random bytes in a handshake nonce (128 bits).
pub const NONCE_BYTES: usize = 16;

/// Generates a fresh base64-encoded nonce for one connection attempt.
pub fn generate_nonce() -> String {
    let bytes: [u8; NONCE_BYTES] = rand::random();
    STANDARD.encode(bytes)
}

/// Computes the expected response for `nonce` as uppercase hex.
pub fn compute_response(secret: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(nonce.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02X}", byte);
    }
    hex
}

/// Returns true if `response` is the digest of `secret || nonce`.
///
/// Surrounding whitespace in the response is ignored.
pub fn verify(nonce: &str, secret: &str, response: &str) -> bool {
    let expected = compute_response(secret, nonce);
    response.trim().eq_ignore_ascii_case(&expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_128_bits_of_base64() {
        let nonce = generate_nonce();
        let decoded = STANDARD.decode(&nonce).unwrap();
        assert_eq!(decoded.len(), NONCE_BYTES);
    }

    #[test]
    fn test_nonces_are_not_reused() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            compute_response("a", "bc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_verify_accepts_matching_response() {
        for secret in ["", "s3cret", "YourSuperSecretKey12345"] {
            for _ in 0..8 {
                let nonce = generate_nonce();
                let response = compute_response(secret, &nonce);
                assert!(verify(&nonce, secret, &response));
            }
        }
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let nonce = generate_nonce();
        let response = compute_response("secret", &nonce).to_lowercase();
        assert!(verify(&nonce, "secret", &response));
        assert!(verify(&nonce, "secret", &format!("  {}\r", response)));
    }

    #[test]
    fn test_verify_rejects_other_responses() {
        let nonce = generate_nonce();
        let good = compute_response("secret", &nonce);

        assert!(!verify(&nonce, "secret", ""));
        assert!(!verify(&nonce, "secret", "OK"));
        assert!(!verify(&nonce, "other", &good));
        assert!(!verify(&generate_nonce(), "secret", &good));
        assert!(!verify(&nonce, "secret", &good[1..]));
    }
}
