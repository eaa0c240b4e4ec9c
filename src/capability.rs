//! Capability handler contract and descriptor types
//!
//! A capability is a named unit of behavior invoked with a JSON object of
//! terms. Handlers come in two flavors that share one `execute` contract:
//! blocking handlers (cipher work, store writes) that the dispatcher moves
//! onto the blocking pool, and async handlers that run on the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{CapabilityError, CapabilityResult};

/// Handler input payload
pub type Terms = Map<String, Value>;

/// Policy tag attached to a capability for bookkeeping and audit labels.
/// It is never consulted as an access-control decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Encrypt,
    Observe,
    Preserve,
    Govern,
    Empathy,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Encrypt => "encrypt",
            Classification::Observe => "observe",
            Classification::Preserve => "preserve",
            Classification::Govern => "govern",
            Classification::Empathy => "empathy",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "encrypt" => Ok(Classification::Encrypt),
            "observe" => Ok(Classification::Observe),
            "preserve" => Ok(Classification::Preserve),
            "govern" => Ok(Classification::Govern),
            "empathy" => Ok(Classification::Empathy),
            other => Err(format!("unknown classification '{other}'")),
        }
    }
}

/// Handler whose work may block the calling thread.
pub trait BlockingCapability: Send + Sync {
    fn execute(&self, terms: Terms) -> CapabilityResult<Value>;
}

/// Handler that may suspend without blocking.
#[async_trait]
pub trait AsyncCapability: Send + Sync {
    async fn execute(&self, terms: Terms) -> CapabilityResult<Value>;
}

/// Tagged handler reference stored in the registry
#[derive(Clone)]
pub enum Handler {
    Blocking(Arc<dyn BlockingCapability>),
    Async(Arc<dyn AsyncCapability>),
}

impl Handler {
    pub fn blocking<H: BlockingCapability + 'static>(handler: H) -> Self {
        Handler::Blocking(Arc::new(handler))
    }

    pub fn from_async<H: AsyncCapability + 'static>(handler: H) -> Self {
        Handler::Async(Arc::new(handler))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Handler::Blocking(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Registered capability: handler plus metadata
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub handler: Handler,
    pub classification: Classification,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}

impl CapabilityDescriptor {
    /// Metadata view without the handler
    pub fn info(&self) -> CapabilityInfo {
        CapabilityInfo {
            name: self.name.clone(),
            classification: self.classification,
            description: self.description.clone(),
            registered_at: self.registered_at,
        }
    }
}

/// Public metadata of a capability as served on discovery endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub classification: Classification,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}

/// Reads a required, non-empty string term.
pub fn required_str<'a>(terms: &'a Terms, field: &str) -> CapabilityResult<&'a str> {
    match terms.get(field) {
        None | Some(Value::Null) => Err(CapabilityError::validation(
            field,
            format!("missing '{field}' in terms"),
        )),
        Some(Value::String(s)) if s.is_empty() => Err(CapabilityError::validation(
            field,
            format!("'{field}' must not be empty"),
        )),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(CapabilityError::validation(
            field,
            format!("'{field}' must be a string"),
        )),
    }
}

/// Reads an optional string term, falling back to `default`.
pub fn str_or<'a>(terms: &'a Terms, field: &str, default: &'a str) -> &'a str {
    terms
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn terms(value: Value) -> Terms {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn classification_round_trips_lowercase() {
        let json = serde_json::to_value(Classification::Preserve).unwrap();
        assert_eq!(json, json!("preserve"));
        assert_eq!("EMPATHY".parse::<Classification>().unwrap(), Classification::Empathy);
        assert!("oversee".parse::<Classification>().is_err());
    }

    #[test]
    fn required_str_rejects_missing_empty_and_non_string() {
        let t = terms(json!({ "a": "", "b": 5, "c": "ok", "d": null }));
        for field in ["a", "b", "d", "missing"] {
            let err = required_str(&t, field).unwrap_err();
            assert!(matches!(err, CapabilityError::Validation { .. }), "{field}");
        }
        assert_eq!(required_str(&t, "c").unwrap(), "ok");
    }

    #[test]
    fn str_or_falls_back() {
        let t = terms(json!({ "actor": "", "action": "VIEW" }));
        assert_eq!(str_or(&t, "actor", "SYSTEM"), "SYSTEM");
        assert_eq!(str_or(&t, "action", "UNKNOWN"), "VIEW");
    }
}
