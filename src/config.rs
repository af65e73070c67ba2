use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::Algorithm;
use crate::error::{Result, SignerError};

/// Client-wide NIP-46 settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nip46Config {
    /// Per-request deadline (milliseconds)
    pub request_timeout_ms: u64,
    /// Payload encryption for new sessions unless the pairing overrides it
    pub algorithm: Algorithm,
    /// Optional app name, sent as a `client` tag on requests
    pub app_name: Option<String>,
    /// Permissions requested on `connect` when the pairing URI carries none
    pub default_permissions: Vec<String>,
    /// tracing level used by `telemetry::init_from_config`
    pub log_level: String,
}

impl Default for Nip46Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 20_000,
            algorithm: Algorithm::Nip44,
            app_name: None,
            default_permissions: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Nip46Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| SignerError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(SignerError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
