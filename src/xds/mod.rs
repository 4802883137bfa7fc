//! Envoy xDS implementation
//!
//! Everything between a declarative spec and a live discovery stream:
//!
//! - [`payload`]: typed payload codec (`@type`-tagged JSON to protobuf `Any`)
//! - [`cluster`], [`listener`], [`route`]: resource builders
//! - [`snapshot`]: snapshot assembly and the per-server cache
//! - [`server`]: tonic ADS/CDS/EDS/LDS/RDS service implementations
//! - [`lifecycle`]: per-spec server instances and their registry

pub mod cluster;
pub mod lifecycle;
pub mod listener;
pub mod payload;
pub mod route;
pub mod server;
pub mod snapshot;

pub use lifecycle::{ServerInstance, ServerRegistry};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotCache};
