//! HMAC-SHA256 signing of outbound webhook bodies (§9 open question,
//! resolved in DESIGN.md: sign in addition to the bare `X-API-Key`).
//! Grounded on `examples/fkrauthan-bounce-relay/src/worker.rs`'s
//! `X-Timestamp`/`X-Signature` pattern.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the signature for `body` signed over `"{timestamp}.{body}"` with
/// `secret`, returning the base64-encoded digest.
pub fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("{timestamp}.{body}").as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

pub fn verify(secret: &str, timestamp: i64, body: &str, signature: &str) -> bool {
    sign(secret, timestamp, body) == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic() {
        assert_eq!(
            sign("secret", 1000, "{}"),
            sign("secret", 1000, "{}")
        );
    }

    #[test]
    fn verify_roundtrips() {
        let sig = sign("secret", 1000, r#"{"a":1}"#);
        assert!(verify("secret", 1000, r#"{"a":1}"#, &sig));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let sig = sign("secret", 1000, r#"{"a":1}"#);
        assert!(!verify("secret", 1000, r#"{"a":2}"#, &sig));
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        assert_ne!(sign("secret-a", 1000, "x"), sign("secret-b", 1000, "x"));
    }
}
