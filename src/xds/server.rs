//! # xDS Discovery Services
//!
//! tonic implementations of Envoy's state-of-the-world discovery protocols:
//! ADS plus the per-type CDS, EDS, LDS, and RDS services. All of them read
//! from one [`SnapshotCache`] and share a single stream handler. Every
//! response carries the full resource set for the requested type URL; ACKs
//! are suppressed, NACKs are logged and the stream keeps its last good
//! version until the next snapshot supersedes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;

use crate::spec::DEFAULT_NODE_ID;
use crate::xds::snapshot::{
    Snapshot, SnapshotCache, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL,
    ROUTE_TYPE_URL,
};

/// State shared by every discovery service of one server instance.
#[derive(Debug)]
pub struct DiscoveryContext {
    pub cache: Arc<SnapshotCache>,
    pub shutdown: CancellationToken,
}

/// Consumer identity carried in a discovery request, with the conventional
/// fallback when the node block is absent or anonymous.
fn request_node_id(request: &DiscoveryRequest) -> String {
    request
        .node
        .as_ref()
        .map(|node| node.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_NODE_ID.to_string())
}

fn response_for(snapshot: &Snapshot, type_url: &str) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: snapshot.version_info(),
        resources: snapshot.resources(type_url).iter().map(|r| r.body.clone()).collect(),
        type_url: type_url.to_string(),
        nonce: uuid::Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

/// Build the unary fetch response for a request. `pinned_type` is the type
/// URL the calling service owns, used when the request leaves it blank.
fn fetch_response(
    cache: &SnapshotCache,
    request: &DiscoveryRequest,
    pinned_type: &str,
) -> std::result::Result<DiscoveryResponse, Status> {
    let node_id = request_node_id(request);
    let type_url =
        if request.type_url.is_empty() { pinned_type } else { request.type_url.as_str() };
    let snapshot = cache.snapshot(&node_id).ok_or_else(|| {
        Status::not_found(format!("no snapshot published for node {:?}", node_id))
    })?;
    Ok(response_for(&snapshot, type_url))
}

/// Push the current snapshot to every subscribed type URL that has not yet
/// seen its version. Returns false once the client side is gone.
async fn push_snapshot(
    cache: &SnapshotCache,
    node_id: &str,
    subscriptions: &mut HashMap<String, u64>,
    tx: &mpsc::Sender<std::result::Result<DiscoveryResponse, Status>>,
) -> bool {
    let Some(snapshot) = cache.snapshot(node_id) else {
        return true;
    };
    for (type_url, last_sent) in subscriptions.iter_mut() {
        if snapshot.version() <= *last_sent {
            continue;
        }
        let response = response_for(&snapshot, type_url);
        debug!(
            node_id = %node_id,
            type_url = %type_url,
            version = %response.version_info,
            resource_count = response.resources.len(),
            "Pushing updated resources"
        );
        if tx.send(Ok(response)).await.is_err() {
            return false;
        }
        *last_sent = snapshot.version();
    }
    true
}

/// Bidirectional stream loop shared by ADS and the per-type services.
///
/// The node identity is fixed by the first request. Each request either
/// opens a subscription (answered with the current snapshot when one is
/// published), ACKs the version already sent (suppressed), or NACKs it
/// (logged, last good version kept). Snapshot updates from the cache fan
/// out to every open subscription; the server's shutdown token ends the
/// stream so graceful stop never hangs on a live consumer.
async fn run_discovery_stream(
    ctx: Arc<DiscoveryContext>,
    mut requests: tonic::Streaming<DiscoveryRequest>,
    tx: mpsc::Sender<std::result::Result<DiscoveryResponse, Status>>,
    pinned_type: Option<&'static str>,
) {
    let mut updates = ctx.cache.subscribe();
    let mut node_id: Option<String> = None;
    let mut subscriptions: HashMap<String, u64> = HashMap::new();

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                debug!(node_id = ?node_id, "Server shutting down, closing discovery stream");
                break;
            }

            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        let Some(node) = node_id.as_deref() else { continue };
                        if update.node_id != node {
                            continue;
                        }
                        if !push_snapshot(&ctx.cache, node, &mut subscriptions, &tx).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Discovery stream lagged behind snapshot updates, resyncing");
                        if let Some(node) = node_id.as_deref() {
                            if !push_snapshot(&ctx.cache, node, &mut subscriptions, &tx).await {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            request = requests.next() => {
                let request = match request {
                    Some(Ok(request)) => request,
                    Some(Err(e)) => {
                        warn!(error = %e, "Error receiving discovery request");
                        break;
                    }
                    None => {
                        debug!(node_id = ?node_id, "Discovery stream ended by client");
                        break;
                    }
                };

                let node = node_id
                    .get_or_insert_with(|| {
                        let id = request_node_id(&request);
                        info!(node_id = %id, "Discovery stream identified");
                        id
                    })
                    .clone();

                let type_url = if request.type_url.is_empty() {
                    match pinned_type {
                        Some(pinned) => pinned.to_string(),
                        None => {
                            warn!(node_id = %node, "Discovery request without a type URL, ignoring");
                            continue;
                        }
                    }
                } else {
                    request.type_url.clone()
                };

                if let Some(error) = &request.error_detail {
                    warn!(
                        node_id = %node,
                        type_url = %type_url,
                        version = %request.version_info,
                        code = error.code,
                        message = %error.message,
                        "Consumer rejected configuration"
                    );
                    subscriptions.entry(type_url).or_insert(0);
                    continue;
                }

                let last_sent = subscriptions.get(&type_url).copied();
                if let Some(sent) = last_sent {
                    // ACK of the version we already delivered, nothing to do.
                    if request.version_info == sent.to_string() {
                        continue;
                    }
                }

                subscriptions.entry(type_url.clone()).or_insert(0);
                match ctx.cache.snapshot(&node) {
                    Some(snapshot) => {
                        let response = response_for(&snapshot, &type_url);
                        debug!(
                            node_id = %node,
                            type_url = %type_url,
                            version = %response.version_info,
                            resource_count = response.resources.len(),
                            "Answering discovery request"
                        );
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                        subscriptions.insert(type_url, snapshot.version());
                    }
                    // Nothing published yet; first snapshot arrives via the
                    // update channel.
                    None => {
                        debug!(node_id = %node, type_url = %type_url, "No snapshot published yet");
                    }
                }
            }
        }
    }
}

type DiscoveryStream = ReceiverStream<std::result::Result<DiscoveryResponse, Status>>;
type DeltaStream = ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>;

fn open_stream(
    ctx: Arc<DiscoveryContext>,
    requests: tonic::Streaming<DiscoveryRequest>,
    pinned_type: Option<&'static str>,
) -> DiscoveryStream {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_discovery_stream(ctx, requests, tx, pinned_type));
    ReceiverStream::new(rx)
}

/// Incremental xDS is not offered; the stream closes immediately and
/// consumers fall back to state-of-the-world.
fn closed_delta_stream() -> DeltaStream {
    let (_tx, rx) = mpsc::channel(1);
    ReceiverStream::new(rx)
}

/// Aggregated Discovery Service: all resource types over one stream.
#[derive(Debug)]
pub struct AggregatedDiscoveryServiceImpl {
    ctx: Arc<DiscoveryContext>,
}

impl AggregatedDiscoveryServiceImpl {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscoveryServiceImpl {
    type StreamAggregatedResourcesStream = DiscoveryStream;
    type DeltaAggregatedResourcesStream = DeltaStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!("New ADS stream connection established");
        Ok(Response::new(open_stream(self.ctx.clone(), request.into_inner(), None)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Ok(Response::new(closed_delta_stream()))
    }
}

/// Cluster Discovery Service.
#[derive(Debug)]
pub struct ClusterDiscoveryServiceImpl {
    ctx: Arc<DiscoveryContext>,
}

impl ClusterDiscoveryServiceImpl {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for ClusterDiscoveryServiceImpl {
    type StreamClustersStream = DiscoveryStream;
    type DeltaClustersStream = DeltaStream;

    async fn stream_clusters(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamClustersStream>, Status> {
        info!("New CDS stream connection established");
        Ok(Response::new(open_stream(
            self.ctx.clone(),
            request.into_inner(),
            Some(CLUSTER_TYPE_URL),
        )))
    }

    async fn delta_clusters(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaClustersStream>, Status> {
        Ok(Response::new(closed_delta_stream()))
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.ctx.cache, request.get_ref(), CLUSTER_TYPE_URL).map(Response::new)
    }
}

/// Endpoint Discovery Service.
#[derive(Debug)]
pub struct EndpointDiscoveryServiceImpl {
    ctx: Arc<DiscoveryContext>,
}

impl EndpointDiscoveryServiceImpl {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for EndpointDiscoveryServiceImpl {
    type StreamEndpointsStream = DiscoveryStream;
    type DeltaEndpointsStream = DeltaStream;

    async fn stream_endpoints(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamEndpointsStream>, Status> {
        info!("New EDS stream connection established");
        Ok(Response::new(open_stream(
            self.ctx.clone(),
            request.into_inner(),
            Some(ENDPOINT_TYPE_URL),
        )))
    }

    async fn delta_endpoints(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaEndpointsStream>, Status> {
        Ok(Response::new(closed_delta_stream()))
    }

    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.ctx.cache, request.get_ref(), ENDPOINT_TYPE_URL).map(Response::new)
    }
}

/// Listener Discovery Service.
#[derive(Debug)]
pub struct ListenerDiscoveryServiceImpl {
    ctx: Arc<DiscoveryContext>,
}

impl ListenerDiscoveryServiceImpl {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for ListenerDiscoveryServiceImpl {
    type StreamListenersStream = DiscoveryStream;
    type DeltaListenersStream = DeltaStream;

    async fn stream_listeners(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamListenersStream>, Status> {
        info!("New LDS stream connection established");
        Ok(Response::new(open_stream(
            self.ctx.clone(),
            request.into_inner(),
            Some(LISTENER_TYPE_URL),
        )))
    }

    async fn delta_listeners(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaListenersStream>, Status> {
        Ok(Response::new(closed_delta_stream()))
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.ctx.cache, request.get_ref(), LISTENER_TYPE_URL).map(Response::new)
    }
}

/// Route Discovery Service.
#[derive(Debug)]
pub struct RouteDiscoveryServiceImpl {
    ctx: Arc<DiscoveryContext>,
}

impl RouteDiscoveryServiceImpl {
    pub fn new(ctx: Arc<DiscoveryContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for RouteDiscoveryServiceImpl {
    type StreamRoutesStream = DiscoveryStream;
    type DeltaRoutesStream = DeltaStream;

    async fn stream_routes(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamRoutesStream>, Status> {
        info!("New RDS stream connection established");
        Ok(Response::new(open_stream(
            self.ctx.clone(),
            request.into_inner(),
            Some(ROUTE_TYPE_URL),
        )))
    }

    async fn delta_routes(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaRoutesStream>, Status> {
        Ok(Response::new(closed_delta_stream()))
    }

    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.ctx.cache, request.get_ref(), ROUTE_TYPE_URL).map(Response::new)
    }
}
