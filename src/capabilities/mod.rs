//! Built-in capabilities registered at startup

pub mod audit_log;
pub mod clinical;
pub mod encryption;

use std::sync::Arc;

use crate::audit_trail::AuditTrail;
use crate::capability::{Classification, Handler};
use crate::cipher::SecretCipher;
use crate::registry::CapabilityRegistry;

use audit_log::AuditLogCapability;
use clinical::{DrugInteractionCapability, ReadmissionRiskCapability, SepsisRiskCapability};
use encryption::{DecryptCapability, EncryptCapability};

/// Registers every built-in capability into `registry`.
pub fn register_builtin(
    registry: &mut CapabilityRegistry,
    cipher: Arc<SecretCipher>,
    trail: Arc<AuditTrail>,
) {
    registry.register(
        encryption::ENCRYPT,
        Handler::blocking(EncryptCapability::new(cipher.clone())),
        Classification::Encrypt,
        "Encrypt plaintext with AES-256-GCM",
    );
    registry.register(
        encryption::DECRYPT,
        Handler::blocking(DecryptCapability::new(cipher)),
        Classification::Encrypt,
        "Decrypt AES-256-GCM ciphertext",
    );
    registry.register(
        audit_log::NAME,
        Handler::blocking(AuditLogCapability::new(trail)),
        Classification::Preserve,
        "Write a compliance event to the audit trail",
    );
    registry.register(
        clinical::SEPSIS_RISK,
        Handler::from_async(SepsisRiskCapability),
        Classification::Empathy,
        "Score sepsis risk from patient vitals",
    );
    registry.register(
        clinical::DRUG_INTERACTION,
        Handler::from_async(DrugInteractionCapability),
        Classification::Empathy,
        "Check a medication list for dangerous interactions",
    );
    registry.register(
        clinical::READMISSION_RISK,
        Handler::from_async(ReadmissionRiskCapability),
        Classification::Observe,
        "Score 30-day readmission risk",
    );
}
