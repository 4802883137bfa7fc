//! # Snapshot Assembly and Caching
//!
//! A [`Snapshot`] is one immutable, versioned bundle of every resource kind
//! built from a tenant's spec: endpoints, clusters, listeners, and route
//! tables, all drawn from the same build pass. [`SnapshotBuilder`] assembles
//! it (aborting on the first hard error so a partial snapshot is never
//! published), and [`SnapshotCache`] holds the published snapshot per
//! consumer identity inside one server instance, stamping versions strictly
//! monotonically and broadcasting updates to live discovery streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tokio::sync::broadcast;
use tracing::debug;

use crate::inventory::Inventory;
use crate::spec::ControlPlaneSpec;
use crate::xds::cluster::ClusterBuilder;
use crate::xds::listener::build_listener;
use crate::xds::route::build_route_config;
use crate::Result;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// All resource kinds a snapshot carries, in build order.
pub const RESOURCE_TYPE_URLS: [&str; 4] =
    [CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL];

/// One built resource: its name plus the encoded `Any` body served on the
/// wire.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub body: Any,
}

impl BuiltResource {
    pub fn new<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self {
            name: name.into(),
            body: Any { type_url: type_url.to_string(), value: message.encode_to_vec() },
        }
    }
}

/// An immutable, versioned bundle of built resources keyed by type URL.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    version: u64,
    resources: HashMap<String, Vec<BuiltResource>>,
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version as the string token carried in discovery responses.
    pub fn version_info(&self) -> String {
        self.version.to_string()
    }

    /// Built resources of one kind, in build order.
    pub fn resources(&self, type_url: &str) -> &[BuiltResource] {
        self.resources.get(type_url).map(Vec::as_slice).unwrap_or_default()
    }

    /// Copy of this snapshot restamped with a publisher-assigned version.
    pub fn with_version(&self, version: u64) -> Snapshot {
        Snapshot { version, resources: self.resources.clone() }
    }

    /// Snapshot from pre-built resource groups keyed by type URL.
    pub fn from_parts(version: u64, parts: Vec<(String, Vec<BuiltResource>)>) -> Snapshot {
        Snapshot { version, resources: parts.into_iter().collect() }
    }
}

/// Assembles snapshots from declarative specs. Holds the inventory handle so
/// endpoint membership is read fresh on every build.
pub struct SnapshotBuilder {
    inventory: Arc<dyn Inventory>,
}

impl SnapshotBuilder {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self { inventory }
    }

    /// Build one snapshot covering every resource kind the spec declares.
    /// Clusters (with their endpoint assignments) build first, then
    /// listeners, then route tables; any hard error aborts with no snapshot.
    pub async fn assemble(&self, spec: &ControlPlaneSpec) -> Result<Snapshot> {
        spec.validate()?;

        let mut clusters = Vec::with_capacity(spec.clusters.len());
        let mut endpoints = Vec::with_capacity(spec.clusters.len());
        let cluster_builder = ClusterBuilder::new(self.inventory.as_ref());
        for cluster_spec in &spec.clusters {
            let (cluster, assignment) = cluster_builder.build(cluster_spec).await?;
            clusters.push(BuiltResource::new(cluster.name.clone(), CLUSTER_TYPE_URL, &cluster));
            endpoints.push(BuiltResource::new(
                assignment.cluster_name.clone(),
                ENDPOINT_TYPE_URL,
                &assignment,
            ));
        }

        let mut listeners = Vec::with_capacity(spec.listeners.len());
        for listener_spec in &spec.listeners {
            let listener = build_listener(listener_spec)?;
            listeners.push(BuiltResource::new(listener.name.clone(), LISTENER_TYPE_URL, &listener));
        }

        let mut routes = Vec::with_capacity(spec.routes.len());
        for route_spec in &spec.routes {
            let route_config = build_route_config(route_spec)?;
            routes.push(BuiltResource::new(
                route_config.name.clone(),
                ROUTE_TYPE_URL,
                &route_config,
            ));
        }

        let mut resources = HashMap::new();
        resources.insert(CLUSTER_TYPE_URL.to_string(), clusters);
        resources.insert(ENDPOINT_TYPE_URL.to_string(), endpoints);
        resources.insert(LISTENER_TYPE_URL.to_string(), listeners);
        resources.insert(ROUTE_TYPE_URL.to_string(), routes);

        let snapshot = Snapshot { version: wall_clock_version(), resources };
        debug!(
            version = snapshot.version,
            clusters = snapshot.resources(CLUSTER_TYPE_URL).len(),
            listeners = snapshot.resources(LISTENER_TYPE_URL).len(),
            routes = snapshot.resources(ROUTE_TYPE_URL).len(),
            "Assembled snapshot"
        );
        Ok(snapshot)
    }
}

/// Build-time version token: wall-clock milliseconds. The publisher breaks
/// ties so two builds in the same quantum still order distinguishably.
fn wall_clock_version() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Notification that a node's snapshot changed.
#[derive(Clone, Debug)]
pub struct SnapshotUpdate {
    pub node_id: String,
    pub version: u64,
}

/// Per-server snapshot store: one published snapshot per consumer identity,
/// a strictly monotonic version stamp, and a broadcast channel feeding live
/// discovery streams. Internally synchronized; never shared across tenants.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
    last_version: AtomicU64,
    update_tx: broadcast::Sender<SnapshotUpdate>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self { snapshots: RwLock::new(HashMap::new()), last_version: AtomicU64::new(0), update_tx }
    }

    /// Assign the publish version for a build: the build's own token when it
    /// is strictly newer than anything issued before, otherwise the previous
    /// version plus one.
    pub fn stamp_version(&self, proposed: u64) -> u64 {
        let mut stamped = 0;
        let _ = self.last_version.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            stamped = proposed.max(last + 1);
            Some(stamped)
        });
        stamped
    }

    /// Install a snapshot for one consumer identity and notify subscribers.
    pub fn install(&self, node_id: &str, snapshot: Arc<Snapshot>) -> Result<()> {
        if node_id.is_empty() {
            return Err(crate::Error::publish("consumer identity must not be empty"));
        }
        let version = snapshot.version();
        {
            let mut snapshots = self.snapshots.write().expect("snapshot cache lock poisoned");
            snapshots.insert(node_id.to_string(), snapshot);
        }
        let _ = self.update_tx.send(SnapshotUpdate { node_id: node_id.to_string(), version });
        Ok(())
    }

    /// Current snapshot published for a consumer identity.
    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().expect("snapshot cache lock poisoned").get(node_id).cloned()
    }

    /// Last version issued by this cache.
    pub fn latest_version(&self) -> u64 {
        self.last_version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotUpdate> {
        self.update_tx.subscribe()
    }
}
