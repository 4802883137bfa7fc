//! # Server Lifecycle Management
//!
//! One gRPC server instance per control-plane spec, tracked in a registry
//! keyed by the spec's identity. The listening socket is bound eagerly so a
//! port conflict surfaces as [`crate::Error::Bind`] before any task spawns,
//! and `stop` only returns once the serve task has exited, which guarantees
//! the port is free again the moment the call completes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;

use crate::xds::server::{
    AggregatedDiscoveryServiceImpl, ClusterDiscoveryServiceImpl, DiscoveryContext,
    EndpointDiscoveryServiceImpl, ListenerDiscoveryServiceImpl, RouteDiscoveryServiceImpl,
};
use crate::xds::snapshot::{Snapshot, SnapshotCache};
use crate::Result;

/// One running xDS server: its port, its private snapshot cache, and the
/// handle of the serve task.
#[derive(Debug)]
pub struct ServerInstance {
    port: u16,
    cache: Arc<SnapshotCache>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerInstance {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Publish a snapshot to every listed consumer identity.
    ///
    /// The cache assigns the wire version once, so all identities observe
    /// the same strictly-increasing version. Installation continues past a
    /// failed identity; the first failure is reported after the fan-out.
    pub fn publish(&self, snapshot: &Snapshot, node_ids: &[String]) -> Result<u64> {
        let version = self.cache.stamp_version(snapshot.version());
        let stamped = Arc::new(snapshot.with_version(version));

        let mut first_error = None;
        for node_id in node_ids {
            if let Err(e) = self.cache.install(node_id, stamped.clone()) {
                error!(node_id = %node_id, error = %e, "Failed to publish snapshot");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(version, nodes = node_ids.len(), port = self.port, "Published snapshot");
                Ok(version)
            }
        }
    }

    /// Stop the server. The port is released by the time this returns.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!(port = self.port, "xDS server stopped");
    }
}

/// Registry of running server instances, keyed by spec identity. All
/// transitions go through one async mutex so concurrent reconciles of the
/// same spec serialize instead of racing for the port.
#[derive(Debug)]
pub struct ServerRegistry {
    bind_address: String,
    servers: Mutex<HashMap<String, Arc<ServerInstance>>>,
}

impl ServerRegistry {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self { bind_address: bind_address.into(), servers: Mutex::new(HashMap::new()) }
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Make sure a server for this spec is running on the requested port.
    ///
    /// Reuses the running instance when the port already matches. On a port
    /// change the old instance is fully stopped before the new bind is
    /// attempted, so the two never hold sockets at the same time.
    pub async fn ensure_server(&self, key: &str, port: u16) -> Result<Arc<ServerInstance>> {
        let mut servers = self.servers.lock().await;

        if let Some(existing) = servers.get(key) {
            if existing.port == port {
                return Ok(existing.clone());
            }
            info!(
                key = %key,
                old_port = existing.port,
                new_port = port,
                "Requested port changed, restarting xDS server"
            );
            let existing = existing.clone();
            existing.stop().await;
            servers.remove(key);
        }

        let instance = self.start_instance(key, port).await?;
        servers.insert(key.to_string(), instance.clone());
        Ok(instance)
    }

    /// Stop and forget the server for a spec, if one is running.
    pub async fn remove_server(&self, key: &str) {
        let removed = self.servers.lock().await.remove(key);
        if let Some(instance) = removed {
            instance.stop().await;
            info!(key = %key, "Removed xDS server");
        }
    }

    /// Running instance for a spec, if any.
    pub async fn get(&self, key: &str) -> Option<Arc<ServerInstance>> {
        self.servers.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.servers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.servers.lock().await.is_empty()
    }

    async fn start_instance(&self, key: &str, port: u16) -> Result<Arc<ServerInstance>> {
        let addr = format!("{}:{}", self.bind_address, port);
        // Eager bind: a conflict must fail the reconcile, not a background
        // task.
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::bind(format!("failed to bind xDS server to {}: {}", addr, e)))?;

        let cache = Arc::new(SnapshotCache::new());
        let shutdown = CancellationToken::new();
        let ctx = Arc::new(DiscoveryContext { cache: cache.clone(), shutdown: shutdown.clone() });

        let incoming = TcpListenerStream::new(listener);
        let serve_shutdown = shutdown.clone();
        let serve_addr = addr.clone();
        let task = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(AggregatedDiscoveryServiceServer::new(
                    AggregatedDiscoveryServiceImpl::new(ctx.clone()),
                ))
                .add_service(ClusterDiscoveryServiceServer::new(ClusterDiscoveryServiceImpl::new(
                    ctx.clone(),
                )))
                .add_service(EndpointDiscoveryServiceServer::new(
                    EndpointDiscoveryServiceImpl::new(ctx.clone()),
                ))
                .add_service(ListenerDiscoveryServiceServer::new(
                    ListenerDiscoveryServiceImpl::new(ctx.clone()),
                ))
                .add_service(RouteDiscoveryServiceServer::new(RouteDiscoveryServiceImpl::new(
                    ctx.clone(),
                )))
                .serve_with_incoming_shutdown(incoming, serve_shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(address = %serve_addr, error = %e, "xDS server exited with error");
            }
        });

        info!(key = %key, address = %addr, "Started xDS server");
        Ok(Arc::new(ServerInstance { port, cache, shutdown, task: Mutex::new(Some(task)) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn publish_stamps_shared_version_across_nodes() {
        let registry = ServerRegistry::new("127.0.0.1");
        let instance = registry.ensure_server("spec-a", free_port()).await.unwrap();

        let snapshot = Snapshot::default().with_version(1000);
        let nodes = vec!["edge-a".to_string(), "edge-b".to_string()];
        let version = instance.publish(&snapshot, &nodes).unwrap();
        assert_eq!(version, 1000);
        assert_eq!(instance.cache().snapshot("edge-a").unwrap().version(), 1000);
        assert_eq!(instance.cache().snapshot("edge-b").unwrap().version(), 1000);

        // Republishing the same build token still moves the wire version.
        let version = instance.publish(&snapshot, &nodes).unwrap();
        assert_eq!(version, 1001);

        instance.stop().await;
    }

    #[tokio::test]
    async fn publish_surfaces_first_failure_after_fanout() {
        let registry = ServerRegistry::new("127.0.0.1");
        let instance = registry.ensure_server("spec-a", free_port()).await.unwrap();

        let snapshot = Snapshot::default().with_version(5);
        let nodes = vec!["".to_string(), "edge-b".to_string()];
        let result = instance.publish(&snapshot, &nodes);
        assert!(matches!(result, Err(crate::Error::Publish(_))));
        // Fan-out continued past the bad identity.
        assert!(instance.cache().snapshot("edge-b").is_some());

        instance.stop().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_a_bind_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let registry = ServerRegistry::new("127.0.0.1");
        let result = registry.ensure_server("spec-a", port).await;
        assert!(matches!(result, Err(crate::Error::Bind(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn ensure_server_reuses_matching_port() {
        let registry = ServerRegistry::new("127.0.0.1");
        let port = free_port();
        let first = registry.ensure_server("spec-a", port).await.unwrap();
        let second = registry.ensure_server("spec-a", port).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);

        registry.remove_server("spec-a").await;
        assert!(registry.is_empty().await);
    }
}
