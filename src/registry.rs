// registry.rs - Capability registration and lookup
//
// Built by the composition root at startup, then shared behind an Arc. Once
// shared there is no mutable access, so lookups never contend with anything.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capability::{CapabilityDescriptor, CapabilityInfo, Classification, Handler};

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the descriptor for `name`. Last writer wins.
    pub fn register(
        &mut self,
        name: &str,
        handler: Handler,
        classification: Classification,
        description: &str,
    ) {
        let descriptor = CapabilityDescriptor {
            name: name.to_string(),
            handler,
            classification,
            description: description.to_string(),
            registered_at: Utc::now(),
        };

        if self
            .capabilities
            .insert(name.to_string(), Arc::new(descriptor))
            .is_some()
        {
            warn!(capability = %name, "Overwriting capability registration");
        }
        info!(capability = %name, classification = %classification, "Registered capability");
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Metadata of every capability, ordered by name
    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.capabilities.values().map(|d| d.info()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
