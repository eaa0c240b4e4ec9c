//! `data:encrypt` and `data:decrypt`
//!
//! Both share one process-wide `SecretCipher`; the key never leaves it.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::capability::{required_str, BlockingCapability, Terms};
use crate::cipher::SecretCipher;
use crate::errors::CapabilityResult;

pub const ENCRYPT: &str = "data:encrypt";
pub const DECRYPT: &str = "data:decrypt";

pub struct EncryptCapability {
    cipher: Arc<SecretCipher>,
}

impl EncryptCapability {
    pub fn new(cipher: Arc<SecretCipher>) -> Self {
        Self { cipher }
    }
}

impl BlockingCapability for EncryptCapability {
    fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let plaintext = required_str(&terms, "plaintext")?;
        let ciphertext = self.cipher.encrypt(plaintext)?;
        Ok(json!({ "ciphertext": ciphertext }))
    }
}

pub struct DecryptCapability {
    cipher: Arc<SecretCipher>,
}

impl DecryptCapability {
    pub fn new(cipher: Arc<SecretCipher>) -> Self {
        Self { cipher }
    }
}

impl BlockingCapability for DecryptCapability {
    fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let ciphertext = required_str(&terms, "ciphertext")?;
        let plaintext = self.cipher.decrypt(ciphertext)?;
        Ok(json!({ "plaintext": plaintext }))
    }
}
