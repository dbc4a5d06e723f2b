//! Symmetric at-rest wrap for SMTP passwords (§3, §6). The wrap key is a
//! process-wide constant loaded once at init (§9 "Global mutable state") and
//! passed through construction; it is never re-read at call sites.
//!
//! Unwrap tolerates legacy plaintext for one migration cycle: if a wrapped
//! value doesn't decode/decrypt as AES-256-GCM, it is returned as-is, mirroring
//! the original service's Fernet-with-plaintext-fallback behavior.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct WrapKey {
    cipher: Aes256Gcm,
}

impl WrapKey {
    /// `key_bytes` must be exactly 32 bytes (AES-256). Typically sourced from
    /// a base64-encoded environment variable at process start.
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn wrap(&self, plaintext: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption cannot fail for valid key/nonce lengths");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        BASE64.encode(out)
    }

    /// Reverse [`WrapKey::wrap`]. Falls back to returning `wrapped` unchanged
    /// if it cannot be decoded or decrypted, to tolerate legacy plaintext
    /// rows written before wrapping was introduced.
    pub fn unwrap(&self, wrapped: &str) -> String {
        self.try_unwrap(wrapped).unwrap_or_else(|| wrapped.to_owned())
    }

    fn try_unwrap(&self, wrapped: &str) -> Option<String> {
        let raw = BASE64.decode(wrapped).ok()?;
        if raw.len() < NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> WrapKey {
        WrapKey::new(&[7u8; 32])
    }

    #[test]
    fn round_trips_a_password() {
        let key = test_key();
        let wrapped = key.wrap("hunter2");
        assert_eq!(key.unwrap(&wrapped), "hunter2");
    }

    #[test]
    fn each_wrap_uses_a_fresh_nonce() {
        let key = test_key();
        assert_ne!(key.wrap("hunter2"), key.wrap("hunter2"));
    }

    #[test]
    fn tolerates_legacy_plaintext() {
        let key = test_key();
        assert_eq!(key.unwrap("plaintext-password"), "plaintext-password");
    }

    #[test]
    fn wrong_key_falls_back_to_raw_value() {
        let key_a = WrapKey::new(&[1u8; 32]);
        let key_b = WrapKey::new(&[2u8; 32]);
        let wrapped = key_a.wrap("secret");
        // key_b can't decrypt it; falls back to returning the wrapped string.
        assert_eq!(key_b.unwrap(&wrapped), wrapped);
    }
}
