//! Library root for the `capability_gateway` crate
//! Audited capability dispatch behind a uniform invocation envelope

// Core error handling
pub mod errors;

// Audit trail
pub mod audit;
pub mod audit_store;
pub mod audit_store_sled;
pub mod audit_trail;

// Capability contract, registry and dispatch
pub mod capability;
pub mod dispatcher;
pub mod registry;

// Encryption
pub mod cipher;

// Built-in handlers
pub mod capabilities;

// Configuration & CLI
pub mod cli;
pub mod config_loader;

// Web server interface
pub mod api_errors;
pub mod app_state;
pub mod gateway;

#[cfg(test)]
mod tests {
    pub mod audit_trail_tests;
    pub mod dispatcher_tests;
    pub mod test_utils;
}

pub use audit::AuditEvent;
pub use audit_trail::AuditTrail;
pub use capability::{AsyncCapability, BlockingCapability, Classification, Handler, Terms};
pub use dispatcher::{Dispatcher, InvocationRequest, InvocationResult};
pub use errors::{CapabilityError, ErrorKind, GatewayError};
pub use registry::CapabilityRegistry;
