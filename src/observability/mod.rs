//! # Observability
//!
//! Structured logging for the planekit control plane, built on the tracing
//! ecosystem. Reconciliation, snapshot assembly, and discovery streams all
//! emit structured events; this module wires up the subscriber.

use tracing_subscriber::EnvFilter;

use crate::Result;

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, falling back to `info`. With
/// `json = true`, events are emitted as JSON lines for log aggregation;
/// otherwise the compact human-readable format is used.
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json { builder.json().try_init() } else { builder.try_init() };

    result.map_err(|e| crate::Error::config(format!("Failed to initialize tracing: {}", e)))
}
