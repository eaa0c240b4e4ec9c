use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audit_trail::AuditTrail,
    capabilities::register_builtin,
    cipher::SecretCipher,
    config_loader::GatewayConfig,
    dispatcher::Dispatcher,
    errors::GatewayResult,
    registry::CapabilityRegistry,
};

/// Composition root shared by every request handler.
pub struct AppState {
    pub config: GatewayConfig,
    pub started_at: DateTime<Utc>,
    dispatcher: Dispatcher,
}

impl AppState {
    /// Wires the built-in capabilities over an existing cipher and trail.
    pub fn new(config: GatewayConfig, cipher: Arc<SecretCipher>, trail: Arc<AuditTrail>) -> Self {
        let mut registry = CapabilityRegistry::new();
        register_builtin(&mut registry, cipher, trail.clone());
        Self::with_registry(config, registry, trail)
    }

    /// Takes ownership of a prepared registry; it is read-only from here on.
    pub fn with_registry(
        config: GatewayConfig,
        registry: CapabilityRegistry,
        trail: Arc<AuditTrail>,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(registry), trail, config.blocking_workers);
        Self {
            config,
            started_at: Utc::now(),
            dispatcher,
        }
    }

    /// Full startup path: cipher from config, sled-backed trail, built-ins.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let cipher = Arc::new(config.resolve_cipher()?);
        info!(fingerprint = %cipher.fingerprint(), "cipher ready");

        let trail = Arc::new(AuditTrail::connect(
            &config.store_path,
            config.audit_retention_days,
        ));
        if !trail.is_available() {
            warn!(
                path = %config.store_path.display(),
                "audit trail unavailable; invocations will run with degraded audit"
            );
        }

        let state = Self::new(config, cipher, trail);
        info!(
            capabilities = state.dispatcher.registry().len(),
            "capability registry initialized"
        );
        Ok(state)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.dispatcher.registry()
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        self.dispatcher.audit()
    }
}
