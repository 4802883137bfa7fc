//! # Configuration Management
//!
//! Runtime settings for the planekit control plane, read from `PLANEKIT_*`
//! environment variables. Per-tenant xDS ports come from each tenant's spec;
//! this module only carries process-wide defaults.

use std::time::Duration;

use crate::Result;

/// Default xDS port used when a spec does not declare one.
pub const DEFAULT_XDS_PORT: u16 = 18000;

/// Default interval before a failed reconciliation is retried.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub xds: XdsConfig,
    pub reconcile: ReconcileConfig,
}

/// xDS server configuration
#[derive(Debug, Clone)]
pub struct XdsConfig {
    /// Address the per-tenant discovery servers bind to.
    pub bind_address: String,
    /// Port used when a spec omits `xdsPort`.
    pub default_port: u16,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Fixed backoff before a failed tenant is requeued.
    pub retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self { xds: XdsConfig::default(), reconcile: ReconcileConfig::default() }
    }
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), default_port: DEFAULT_XDS_PORT }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { retry_backoff: DEFAULT_RETRY_BACKOFF }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bind_address = std::env::var("PLANEKIT_XDS_BIND_ADDRESS")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let default_port = std::env::var("PLANEKIT_XDS_DEFAULT_PORT")
            .unwrap_or_else(|_| DEFAULT_XDS_PORT.to_string())
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid default xDS port: {}", e)))?;

        let retry_backoff_secs: u64 = std::env::var("PLANEKIT_RETRY_BACKOFF_SECS")
            .unwrap_or_else(|_| DEFAULT_RETRY_BACKOFF.as_secs().to_string())
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid retry backoff: {}", e)))?;

        Ok(Self {
            xds: XdsConfig { bind_address, default_port },
            reconcile: ReconcileConfig { retry_backoff: Duration::from_secs(retry_backoff_secs) },
        })
    }
}
