// audit_log.rs - `audit:log` capability
//
// Lets callers write their own compliance events into the trail the
// dispatcher uses. The dispatcher still records its own CAPABILITY_INVOKE
// event for the call itself.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::audit::{AuditEvent, SYSTEM_ACTOR};
use crate::audit_trail::AuditTrail;
use crate::capability::{str_or, BlockingCapability, Terms};
use crate::errors::CapabilityResult;

pub const NAME: &str = "audit:log";

const DEFAULT_EVENT_TYPE: &str = "GENERIC";
const UNKNOWN: &str = "UNKNOWN";

pub struct AuditLogCapability {
    trail: Arc<AuditTrail>,
}

impl AuditLogCapability {
    pub fn new(trail: Arc<AuditTrail>) -> Self {
        Self { trail }
    }
}

impl BlockingCapability for AuditLogCapability {
    fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let resource = terms
            .get("resource")
            .or_else(|| terms.get("entity_id"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN);

        let mut details = match terms.get("details") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Terms::new(),
            Some(other) => {
                let mut wrapped = Terms::new();
                wrapped.insert("value".to_string(), other.clone());
                wrapped
            }
        };
        if let Some(data) = terms.get("data") {
            details.insert("data_hash".to_string(), Value::String(data_hash(data)));
        }

        let event = AuditEvent::new(
            str_or(&terms, "event_type", DEFAULT_EVENT_TYPE),
            str_or(&terms, "actor", SYSTEM_ACTOR),
            resource,
            str_or(&terms, "action", UNKNOWN),
        )
        .with_details(Value::Object(details));

        let sequence = self.trail.append(&event)?;
        Ok(json!({
            "logged": true,
            "log_id": event.id(),
            "sequence": sequence,
        }))
    }
}

/// SHA-256 of the payload, hex encoded. Strings hash their raw bytes; other
/// values hash their compact JSON form.
fn data_hash(data: &Value) -> String {
    match data {
        Value::String(s) => hex::encode(Sha256::digest(s.as_bytes())),
        other => hex::encode(Sha256::digest(other.to_string().as_bytes())),
    }
}
