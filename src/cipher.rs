use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{CapabilityError, CapabilityResult, GatewayError, GatewayResult};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// AES-256-GCM cipher keyed once per process.
///
/// Ciphertext layout is `base64(nonce(12) || sealed)`, with a fresh random
/// nonce for every message.
pub struct SecretCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl SecretCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key)),
            fingerprint: key_fingerprint(key),
        }
    }

    /// Builds a cipher from a base64-encoded 32-byte secret.
    pub fn from_base64(encoded_key: &str) -> GatewayResult<Self> {
        let key = decode_base64_key(encoded_key)?;
        Ok(Self::new(&key))
    }

    /// Short SHA-256 fingerprint of the key, safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn encrypt(&self, plaintext: &str) -> CapabilityResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CapabilityError::fault("encryption failed"))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, ciphertext: &str) -> CapabilityResult<String> {
        let raw = general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CapabilityError::decryption("ciphertext is not valid base64"))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CapabilityError::decryption("ciphertext too short"));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CapabilityError::decryption("authentication failed"))?;

        String::from_utf8(plaintext)
            .map_err(|_| CapabilityError::decryption("plaintext is not valid UTF-8"))
    }
}

pub fn decode_base64_key(encoded_key: &str) -> GatewayResult<[u8; KEY_LEN]> {
    let decoded = general_purpose::STANDARD
        .decode(encoded_key.trim())
        .map_err(|_| GatewayError::config("cipher secret is not valid base64"))?;
    if decoded.len() != KEY_LEN {
        return Err(GatewayError::config(format!(
            "cipher secret must decode to {KEY_LEN} bytes, got {}",
            decoded.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// Fresh random key, base64 encoded.
pub fn generate_base64_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut key);
    general_purpose::STANDARD.encode(key)
}

fn key_fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_base64(&generate_base64_key()).unwrap()
    }

    #[test]
    fn round_trips_text() {
        let cipher = cipher();
        let long = "x".repeat(10_000);
        for text in ["hello-world", "PHI-123", "ünïcödé ✓", long.as_str()] {
            let sealed = cipher.encrypt(text).unwrap();
            assert_ne!(sealed, text);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), text);
        }
    }

    #[test]
    fn nonces_differ_per_message() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn tampering_is_detected() {
        let cipher = cipher();
        let sealed = cipher.encrypt("hello-world").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        for i in [0, NONCE_LEN, raw.len() - 1] {
            raw[i] ^= 0x01;
            let tampered = general_purpose::STANDARD.encode(&raw);
            let err = cipher.decrypt(&tampered).unwrap_err();
            assert!(matches!(err, CapabilityError::Decryption { .. }));
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn foreign_key_is_rejected() {
        let sealed = cipher().encrypt("secret").unwrap();
        let err = cipher().decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CapabilityError::Decryption { .. }));
    }

    #[test]
    fn malformed_input_is_decryption_error() {
        let cipher = cipher();
        for bad in ["not base64!!", "AAAA"] {
            assert!(matches!(
                cipher.decrypt(bad).unwrap_err(),
                CapabilityError::Decryption { .. }
            ));
        }
    }

    #[test]
    fn key_decoding_enforces_length() {
        assert!(decode_base64_key("c2hvcnQ=").is_err());
        assert!(decode_base64_key("%%%").is_err());
        let key = generate_base64_key();
        assert_eq!(decode_base64_key(&key).unwrap().len(), KEY_LEN);
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = generate_base64_key();
        let a = SecretCipher::from_base64(&key).unwrap();
        let b = SecretCipher::from_base64(&key).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn fingerprint_is_the_digest_prefix() {
        // SHA-256 of 32 zero bytes starts with 66687aadf862bd77.
        assert_eq!(key_fingerprint(&[0u8; KEY_LEN]), "66687aadf862bd77");
    }
}
