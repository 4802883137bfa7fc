//! # Planekit
//!
//! Planekit synthesizes Envoy xDS configuration from declarative specs and
//! serves it over gRPC. Each spec describes one tenant's data plane:
//! listeners with opaque typed filter payloads, clusters with label-selected
//! endpoint membership and health checking, and optional route tables. A
//! reconciler keeps one discovery server per spec running on its declared
//! port and publishes a fresh snapshot whenever the spec or the inventory
//! changes.
//!
//! ## Architecture
//!
//! ```text
//! Spec Document → Snapshot Builder → Snapshot Cache → xDS Server → Envoy
//!       ↓                ↓                                 ↓
//! Payload Codec   Endpoint Resolver              Lifecycle Registry
//! ```
//!
//! ## Core Components
//!
//! - **Payload Codec**: decodes `@type`-tagged JSON into protobuf `Any`
//! - **Snapshot Builder**: assembles versioned resource bundles per spec
//! - **xDS Server**: tonic-based ADS/CDS/EDS/LDS/RDS discovery services
//! - **Reconciler**: drives specs to their desired state with status conditions
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use planekit::inventory::StaticInventory;
//! use planekit::reconciler::{ReconcileStatus, Reconciler};
//! use planekit::xds::ServerRegistry;
//! use planekit::{Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let registry = Arc::new(ServerRegistry::new(config.xds.bind_address.clone()));
//!     let reconciler = Reconciler::new(registry, Arc::new(StaticInventory::default()), &config);
//!     let spec = serde_json::from_str(r#"{ "listeners": [], "clusters": [] }"#)
//!         .map_err(|e| planekit::Error::config(e.to_string()))?;
//!     let mut status = ReconcileStatus::default();
//!     reconciler.reconcile("demo", &spec, &mut status).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod inventory;
pub mod observability;
pub mod reconciler;
pub mod spec;
pub mod xds;

// Re-export commonly used types and traits
pub use config::Config;
pub use errors::{Error, Result};
pub use observability::init_tracing;
pub use spec::ControlPlaneSpec;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "planekit");
    }
}
