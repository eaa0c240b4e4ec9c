// audit.rs
// Immutable audit record written by the dispatcher and the audit:log capability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event type emitted for every dispatched invocation
pub const CAPABILITY_INVOKE: &str = "CAPABILITY_INVOKE";
/// Action recorded when a registered capability ran
pub const ACTION_EXECUTE: &str = "EXECUTE";
/// Action recorded when the capability name did not resolve
pub const ACTION_EXECUTE_DENIED: &str = "EXECUTE_DENIED";
/// Actor used when the caller supplied none
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Core audit event record
///
/// Fields are private; once built an event can only be read, serialized and
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    id: String,
    timestamp: DateTime<Utc>,
    event_type: String,
    actor: String,
    resource: String,
    action: String,
    details: Value,
}

impl AuditEvent {
    /// Creates an event stamped with a fresh id and the current time
    pub fn new(event_type: &str, actor: &str, resource: &str, action: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            details: Value::Object(Default::default()),
        }
    }

    /// Attaches the free-form detail payload
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn details(&self) -> &Value {
        &self.details
    }

    /// Key under which the event is stored in the secondary index:
    /// `audit:{event_type}:{unix seconds}.{micros}:{id}`. The id keeps two
    /// events of one type in the same microsecond apart.
    pub fn index_key(&self) -> String {
        format!(
            "audit:{}:{}.{:06}:{}",
            self.event_type,
            self.timestamp.timestamp(),
            self.timestamp.timestamp_subsec_micros(),
            self.id
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "{} | {} -> {} ({})",
            self.event_type, self.actor, self.resource, self.action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audit_event_structures_correctly() {
        let event = AuditEvent::new(CAPABILITY_INVOKE, "dr-house", "data:encrypt", ACTION_EXECUTE)
            .with_details(json!({ "terms": { "plaintext": "x" } }));

        assert_eq!(event.event_type(), CAPABILITY_INVOKE);
        assert_eq!(event.actor(), "dr-house");
        assert_eq!(event.resource(), "data:encrypt");
        assert_eq!(event.action(), ACTION_EXECUTE);
        assert_eq!(event.details()["terms"]["plaintext"], "x");
        assert!(Uuid::parse_str(event.id()).is_ok());
    }

    #[test]
    fn index_key_follows_layout() {
        let event = AuditEvent::new("GENERIC", SYSTEM_ACTOR, "UNKNOWN", "VIEW");
        let key = event.index_key();
        let prefix = format!("audit:GENERIC:{}.", event.timestamp().timestamp());
        assert!(key.starts_with(&prefix), "unexpected key {key}");
        assert!(key.ends_with(&format!(":{}", event.id())), "unexpected key {key}");
        assert_eq!(key.len(), prefix.len() + 6 + 1 + event.id().len());
    }

    #[test]
    fn same_microsecond_events_get_distinct_keys() {
        let template = json!({
            "timestamp": "2026-01-01T00:00:00.000001Z",
            "event_type": "GENERIC",
            "actor": SYSTEM_ACTOR,
            "resource": "UNKNOWN",
            "action": "VIEW",
            "details": {}
        });
        let mut first = template.clone();
        first["id"] = json!(Uuid::new_v4().to_string());
        let mut second = template;
        second["id"] = json!(Uuid::new_v4().to_string());

        let first: AuditEvent = serde_json::from_value(first).unwrap();
        let second: AuditEvent = serde_json::from_value(second).unwrap();
        assert_eq!(first.timestamp(), second.timestamp());
        assert_ne!(first.index_key(), second.index_key());
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let event = AuditEvent::new(CAPABILITY_INVOKE, SYSTEM_ACTOR, "nope:nope", ACTION_EXECUTE_DENIED);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], CAPABILITY_INVOKE);
        assert_eq!(value["action"], ACTION_EXECUTE_DENIED);

        let back: AuditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
