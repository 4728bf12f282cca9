//! Engine configuration: service endpoints and phase timeouts, plus the
//! persisted per-user `DevConfig` file they can be layered from.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;

pub const DEFAULT_FAST_VAULT_URL: &str = "https://api.vultisig.com";
pub const DEFAULT_RELAY_URL: &str = "https://api.vultisig.com/router";
pub const DEFAULT_VERIFIER_URL: &str = "http://localhost:8080";

pub const ENV_RELAY_URL: &str = "DEVCTL_RELAY_URL";
pub const ENV_FAST_VAULT_URL: &str = "DEVCTL_FAST_VAULT_URL";
pub const ENV_VERIFIER_URL: &str = "DEVCTL_VERIFIER_URL";

/// Everything a `SessionCoordinator` needs to reach its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub relay_url: String,
    pub fast_vault_url: String,
    pub verifier_url: String,
    /// Delay between relay membership polls.
    pub poll_interval: Duration,
    pub keygen_timeout: Duration,
    pub reshare_timeout: Duration,
    pub keysign_timeout: Duration,
    pub verifier_keysign_timeout: Duration,
    /// Per-request timeout for relay and join calls.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            fast_vault_url: DEFAULT_FAST_VAULT_URL.to_string(),
            verifier_url: DEFAULT_VERIFIER_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            keygen_timeout: Duration::from_secs(3 * 60),
            reshare_timeout: Duration::from_secs(3 * 60),
            keysign_timeout: Duration::from_secs(3 * 60),
            verifier_keysign_timeout: Duration::from_secs(2 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Defaults, then the persisted dev config, then environment overrides.
    pub fn from_dev_config(dev: &DevConfig) -> Self {
        let mut config = EngineConfig::default();
        if let Some(url) = &dev.relay_url {
            config.relay_url = url.clone();
        }
        if let Some(url) = &dev.vultiserver_url {
            config.fast_vault_url = url.clone();
        }
        if !dev.verifier.is_empty() {
            config.verifier_url = dev.verifier.clone();
        }
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_RELAY_URL) {
            self.relay_url = url;
        }
        if let Ok(url) = std::env::var(ENV_FAST_VAULT_URL) {
            self.fast_vault_url = url;
        }
        if let Ok(url) = std::env::var(ENV_VERIFIER_URL) {
            self.verifier_url = url;
        }
    }
}

/// Per-user settings persisted to `~/.vultisig/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vultiserver_url: Option<String>,
    #[serde(default)]
    pub vault_name: String,
    #[serde(default)]
    pub public_key_ecdsa: String,
    #[serde(default)]
    pub public_key_eddsa: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub auth_public_key: String,
    #[serde(default)]
    pub auth_expires_at: String,
}

impl DevConfig {
    pub fn with_defaults() -> Self {
        DevConfig {
            verifier: DEFAULT_VERIFIER_URL.to_string(),
            ..DevConfig::default()
        }
    }

    /// `~/.vultisig`, falling back to the working directory without a home.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vultisig")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.json")
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No dev config found, using defaults");
                Ok(DevConfig::with_defaults())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}
