// Webhook Signature Verification
// HMAC-SHA256 over the raw request body, compared in constant time against
// the `sha256=<hex>` header. Fails closed on any malformed input.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a `sha256=<hex>` signature header against the raw body bytes.
/// Returns false for a missing prefix, non-hex digest, wrong length, or
/// non-matching MAC. Never panics, never allocates the secret elsewhere.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    // verify_slice is constant-time and rejects wrong-length digests.
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature header value for a body, used by tests and by the
/// outbound delivery path of local tooling.
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(raw_body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let secret = "s3cr3t";
        let body = br#"{"action":"opened"}"#;
        let header = sign(secret, body);
        assert!(verify_signature(secret, body, &header));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign("right", body);
        assert!(!verify_signature("wrong", body, &header));
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("secret", b"original");
        assert!(!verify_signature("secret", b"tampered", &header));
    }

    #[test]
    fn malformed_headers_fail_closed() {
        let body = b"payload";
        assert!(!verify_signature("secret", body, ""));
        assert!(!verify_signature("secret", body, "sha1=abcdef"));
        assert!(!verify_signature("secret", body, "sha256=not-hex"));
        assert!(!verify_signature("secret", body, "sha256=abcd")); // wrong length
    }
}
