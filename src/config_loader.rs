use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::audit_trail::DEFAULT_RETENTION_DAYS;
use crate::cipher::{decode_base64_key, generate_base64_key, SecretCipher};
use crate::dispatcher::DEFAULT_BLOCKING_WORKERS;
use crate::errors::{GatewayError, GatewayResult};

pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";
pub const ENV_PREFIX: &str = "GATEWAY_";

/// How strictly startup treats missing secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Production,
    Development,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub store_path: PathBuf,
    /// Base64 of a 32-byte AES key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_secret: Option<String>,
    pub mode: OperatingMode,
    pub log_level: String,
    pub audit_retention_days: u32,
    pub index_sweep_secs: u64,
    pub blocking_workers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_timeout_ms: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            store_path: PathBuf::from("data/audit_store"),
            cipher_secret: None,
            mode: OperatingMode::Production,
            log_level: "info".to_string(),
            audit_retention_days: DEFAULT_RETENTION_DAYS,
            index_sweep_secs: 3600,
            blocking_workers: DEFAULT_BLOCKING_WORKERS,
            invoke_timeout_ms: None,
        }
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store_path", &self.store_path)
            .field("cipher_secret", &self.cipher_secret.as_ref().map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .field("log_level", &self.log_level)
            .field("audit_retention_days", &self.audit_retention_days)
            .field("index_sweep_secs", &self.index_sweep_secs)
            .field("blocking_workers", &self.blocking_workers)
            .field("invoke_timeout_ms", &self.invoke_timeout_ms)
            .finish()
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }

    pub fn index_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.index_sweep_secs.max(1))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.port == 0 {
            return Err(GatewayError::config("port must be non-zero"));
        }
        if self.host.trim().is_empty() {
            return Err(GatewayError::config("host cannot be empty"));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(GatewayError::config("store_path cannot be empty"));
        }
        if self.audit_retention_days == 0 {
            return Err(GatewayError::config("audit_retention_days must be at least 1"));
        }
        if self.blocking_workers == 0 {
            return Err(GatewayError::config("blocking_workers must be at least 1"));
        }
        if self.invoke_timeout_ms == Some(0) {
            return Err(GatewayError::config("invoke_timeout_ms must be positive when set"));
        }
        if let Some(secret) = &self.cipher_secret {
            decode_base64_key(secret)?;
        }
        Ok(())
    }

    /// Builds the process cipher.
    ///
    /// Production mode refuses to start without a configured secret.
    /// Development mode falls back to a key that dies with the process.
    pub fn resolve_cipher(&self) -> GatewayResult<SecretCipher> {
        match (&self.cipher_secret, self.mode) {
            (Some(secret), _) => SecretCipher::from_base64(secret),
            (None, OperatingMode::Production) => Err(GatewayError::config(format!(
                "cipher_secret is required in production mode (set {ENV_PREFIX}CIPHER_SECRET)"
            ))),
            (None, OperatingMode::Development) => {
                let cipher = SecretCipher::from_base64(&generate_base64_key())?;
                warn!(
                    fingerprint = %cipher.fingerprint(),
                    "No cipher secret configured; using an EPHEMERAL key. Data encrypted now cannot be decrypted after restart."
                );
                Ok(cipher)
            }
        }
    }
}

/// Loads configuration: defaults, then the TOML file, then `GATEWAY_*` env.
///
/// An explicit `path` must exist; the default `gateway.toml` is optional.
pub fn load_config(path: Option<&Path>) -> GatewayResult<GatewayConfig> {
    let file = match path {
        Some(p) if !p.exists() => {
            return Err(GatewayError::config(format!(
                "config file not found: {}",
                p.display()
            )))
        }
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    let config: GatewayConfig = Figment::from(Serialized::defaults(GatewayConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;

    config.validate()?;
    Ok(config)
}
