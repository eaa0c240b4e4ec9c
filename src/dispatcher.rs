//! Invocation protocol
//!
//! `Dispatcher::invoke` resolves a capability, runs its handler under the
//! uniform envelope, times the handler, and writes exactly one audit event
//! whatever the outcome. Nothing raised by a handler, panics included,
//! crosses this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::audit::{AuditEvent, ACTION_EXECUTE, ACTION_EXECUTE_DENIED, CAPABILITY_INVOKE, SYSTEM_ACTOR};
use crate::audit_trail::AuditTrail;
use crate::capability::{CapabilityDescriptor, Classification, Handler, Terms};
use crate::errors::{CapabilityError, CapabilityResult, ErrorKind};
use crate::registry::CapabilityRegistry;

pub const DEFAULT_BLOCKING_WORKERS: usize = 16;

/// One dispatch call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub capability: String,
    #[serde(default)]
    pub terms: Terms,
    #[serde(default)]
    pub context: Terms,
    /// Classification hint, echoed back unverified
    #[serde(default, rename = "pillar")]
    pub classification: Option<Classification>,
}

impl InvocationRequest {
    pub fn new(capability: &str, terms: Terms) -> Self {
        Self {
            capability: capability.to_string(),
            terms,
            context: Terms::new(),
            classification: None,
        }
    }

    pub fn with_context(mut self, context: Terms) -> Self {
        self.context = context;
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.context.insert("actor".to_string(), Value::String(actor.to_string()));
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Caller identity from `context.actor`, then the legacy `context.user_id`.
    pub fn actor(&self) -> &str {
        ["actor", "user_id"]
            .iter()
            .find_map(|key| self.context.get(*key).and_then(Value::as_str))
            .filter(|actor| !actor.is_empty())
            .unwrap_or(SYSTEM_ACTOR)
    }
}

/// Uniform envelope returned for every invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "pillar")]
    pub classification: Option<Classification>,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Set when the audit write for this invocation failed
    #[serde(default)]
    pub audit_degraded: bool,
}

impl InvocationResult {
    pub fn success(result: Value, classification: Option<Classification>, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            classification,
            execution_time_ms: execution_time_ms.max(0.0),
            timestamp: Utc::now(),
            error_kind: None,
            audit_degraded: false,
        }
    }

    pub fn failure(
        error: CapabilityError,
        classification: Option<Classification>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            classification,
            execution_time_ms: execution_time_ms.max(0.0),
            timestamp: Utc::now(),
            error_kind: Some(error.kind()),
            audit_degraded: false,
        }
    }

    pub fn with_audit_degraded(mut self, degraded: bool) -> Self {
        self.audit_degraded = degraded;
        self
    }
}

/// Stateless orchestrator over the registry and the audit trail
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    audit: Arc<AuditTrail>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    /// `blocking_workers` bounds how many blocking handlers run at once.
    pub fn new(registry: Arc<CapabilityRegistry>, audit: Arc<AuditTrail>, blocking_workers: usize) -> Self {
        Self {
            registry,
            audit,
            workers: Arc::new(Semaphore::new(blocking_workers.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Runs one invocation to completion.
    ///
    /// The work is detached onto its own task: if the caller stops waiting,
    /// the handler and its audit write still finish.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let dispatcher = self.clone();
        let capability = request.capability.clone();
        let classification = request.classification;

        match tokio::spawn(async move { dispatcher.run(request).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(capability = %capability, error = %e, "dispatch task aborted");
                InvocationResult::failure(
                    CapabilityError::fault(format!("dispatch of '{capability}' aborted")),
                    classification,
                    0.0,
                )
            }
        }
    }

    async fn run(&self, request: InvocationRequest) -> InvocationResult {
        let actor = request.actor().to_string();
        let InvocationRequest {
            capability,
            terms,
            classification,
            ..
        } = request;

        let Some(descriptor) = self.registry.lookup(&capability) else {
            let err = CapabilityError::not_found(&capability);
            warn!(capability = %capability, actor = %actor, "Capability not found");
            let event = AuditEvent::new(CAPABILITY_INVOKE, &actor, &capability, ACTION_EXECUTE_DENIED)
                .with_details(json!({ "terms": terms, "error": err.to_string() }));
            let degraded = self.record(event).await;
            return InvocationResult::failure(err, classification, 0.0).with_audit_degraded(degraded);
        };

        let (outcome, elapsed) = self.execute(&descriptor, terms.clone()).await;
        let execution_time_ms = elapsed.as_secs_f64() * 1000.0;

        let mut details = json!({
            "terms": terms,
            "classification": descriptor.classification,
            "success": outcome.is_ok(),
            "execution_time_ms": execution_time_ms,
        });
        match &outcome {
            Ok(_) => debug!(capability = %capability, execution_time_ms, "Capability executed"),
            Err(e) => {
                error!(capability = %capability, kind = %e.kind(), error = %e, "Capability execution failed");
                details["error"] = Value::String(e.to_string());
            }
        }

        let event = AuditEvent::new(CAPABILITY_INVOKE, &actor, &capability, ACTION_EXECUTE)
            .with_details(details);
        let degraded = self.record(event).await;

        match outcome {
            Ok(value) => InvocationResult::success(value, classification, execution_time_ms),
            Err(e) => InvocationResult::failure(e, classification, execution_time_ms),
        }
        .with_audit_degraded(degraded)
    }

    /// Executes the handler and measures only the handler's own run time.
    async fn execute(
        &self,
        descriptor: &CapabilityDescriptor,
        terms: Terms,
    ) -> (CapabilityResult<Value>, Duration) {
        let joined = match &descriptor.handler {
            Handler::Async(handler) => {
                let handler = Arc::clone(handler);
                let started = Instant::now();
                let joined = tokio::spawn(async move { handler.execute(terms).await }).await;
                (joined, started.elapsed())
            }
            Handler::Blocking(handler) => {
                let permit = match Arc::clone(&self.workers).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            Err(CapabilityError::fault("blocking worker pool closed")),
                            Duration::ZERO,
                        )
                    }
                };
                let handler = Arc::clone(handler);
                let started = Instant::now();
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    handler.execute(terms)
                })
                .await;
                (joined, started.elapsed())
            }
        };

        let (joined, elapsed) = joined;
        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(CapabilityError::fault(format!(
                "handler '{}' panicked: {}",
                descriptor.name,
                panic_message(e.into_panic())
            ))),
            Err(_) => Err(CapabilityError::fault(format!(
                "handler '{}' was cancelled",
                descriptor.name
            ))),
        };
        (outcome, elapsed)
    }

    /// Writes the audit event; returns true when the write failed.
    async fn record(&self, event: AuditEvent) -> bool {
        let audit = Arc::clone(&self.audit);
        let resource = event.resource().to_string();
        match tokio::task::spawn_blocking(move || audit.append(&event)).await {
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                warn!(
                    target: "audit",
                    capability = %resource,
                    error = %e,
                    "audit write failed, invocation outcome kept (degraded audit)"
                );
                true
            }
            Err(e) => {
                error!(target: "audit", capability = %resource, error = %e, "audit writer task failed");
                true
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_prefers_actor_then_user_id() {
        let mut context = Terms::new();
        context.insert("user_id".into(), json!("legacy-user"));
        let request = InvocationRequest::new("x:y", Terms::new()).with_context(context);
        assert_eq!(request.actor(), "legacy-user");

        let request = request.with_actor("dr-grey");
        assert_eq!(request.actor(), "dr-grey");

        let anonymous = InvocationRequest::new("x:y", Terms::new());
        assert_eq!(anonymous.actor(), SYSTEM_ACTOR);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: InvocationRequest =
            serde_json::from_value(json!({ "capability": "data:encrypt" })).unwrap();
        assert!(request.terms.is_empty());
        assert!(request.context.is_empty());
        assert!(request.classification.is_none());

        let request: InvocationRequest = serde_json::from_value(json!({
            "capability": "data:encrypt",
            "terms": { "plaintext": "x" },
            "pillar": "encrypt"
        }))
        .unwrap();
        assert_eq!(request.classification, Some(Classification::Encrypt));
    }

    #[test]
    fn envelope_populates_exactly_one_side() {
        let ok = InvocationResult::success(json!({ "a": 1 }), None, 1.5);
        assert!(ok.success && ok.result.is_some() && ok.error.is_none());
        assert!(ok.error_kind.is_none());

        let failed = InvocationResult::failure(
            CapabilityError::validation("plaintext", "missing"),
            Some(Classification::Encrypt),
            -3.0,
        );
        assert!(!failed.success && failed.result.is_none() && failed.error.is_some());
        assert_eq!(failed.error_kind, Some(ErrorKind::ValidationError));
        assert_eq!(failed.execution_time_ms, 0.0);

        let wire = serde_json::to_value(&failed).unwrap();
        assert_eq!(wire["pillar"], "encrypt");
        assert_eq!(wire["error_kind"], "ValidationError");
        assert!(wire["result"].is_null());
        assert!(wire.get("execution_time_ms").is_some());
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
