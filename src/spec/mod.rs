//! # Declarative Control-Plane Spec
//!
//! Serde representation of the declarative configuration document that drives
//! snapshot synthesis. One `ControlPlaneSpec` describes one tenant: the xDS
//! port its discovery server binds, the consumer identities (Envoy node IDs)
//! that receive its snapshots, and the listeners, clusters, and route tables
//! to synthesize.
//!
//! The document uses camelCase keys on the wire. Typed payloads (transport
//! sockets, network filters, access logs) are open JSON objects carrying an
//! `@type` tag; they stay as [`serde_json::Value`] here and are decoded by the
//! payload codec at build time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// Node ID snapshots are published under when a spec declares none.
pub const DEFAULT_NODE_ID: &str = "external-envoy";

/// Declarative configuration for one tenant's data plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Port the tenant's discovery server listens on. Defaults to the
    /// process-wide default port when unset.
    pub xds_port: Option<u16>,

    /// Envoy node IDs that should receive this configuration.
    #[serde(default, rename = "nodeIDs")]
    pub node_ids: Vec<String>,

    pub listeners: Vec<ListenerSpec>,

    pub clusters: Vec<ClusterSpec>,

    #[serde(default)]
    pub routes: Vec<RouteConfigSpec>,
}

impl ControlPlaneSpec {
    /// Structural validation: a usable spec carries at least one listener and
    /// one cluster.
    pub fn validate(&self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(crate::Error::config("spec must declare at least one listener"));
        }
        if self.clusters.is_empty() {
            return Err(crate::Error::config("spec must declare at least one cluster"));
        }
        Ok(())
    }

    /// Consumer identities to publish under, defaulting to
    /// [`DEFAULT_NODE_ID`] when the spec declares none.
    pub fn node_ids(&self) -> Vec<String> {
        if self.node_ids.is_empty() {
            vec![DEFAULT_NODE_ID.to_string()]
        } else {
            self.node_ids.clone()
        }
    }

    /// Declared xDS port, or `default` when unset.
    pub fn port_or(&self, default: u16) -> u16 {
        self.xds_port.unwrap_or(default)
    }
}

/// Declarative cluster definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,

    /// Discovery mechanism: "static" or "strict_dns". Unrecognized values
    /// fall back to strict DNS.
    #[serde(default, rename = "type")]
    pub discovery_type: Option<String>,

    /// Load-balancing policy: "round_robin" or "least_request". Unrecognized
    /// values fall back to round robin.
    #[serde(default)]
    pub lb_policy: Option<String>,

    /// Upstream connect timeout as a duration string ("250ms", "1s").
    #[serde(default)]
    pub connect_timeout: Option<String>,

    #[serde(default)]
    pub transport_socket: Option<TransportSocketSpec>,

    #[serde(default)]
    pub load_assignment: Option<LoadAssignmentSpec>,

    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

/// Transport-security payload attached to a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSocketSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<serde_json::Value>,
}

/// How a cluster obtains its endpoint membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAssignmentSpec {
    #[serde(default)]
    pub endpoints_from: Option<EndpointSourceSpec>,
}

/// Selector describing how to discover live endpoints from the inventory.
/// Resolved fresh on every snapshot build; membership is never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSourceSpec {
    /// Selector kind. "Member" selects labeled inventory members; other
    /// kinds are reserved and currently resolve to no endpoints.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub selector: Option<LabelSelector>,

    /// Logical port every resolved address is combined with.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Label selector over inventory members, with Kubernetes-style semantics:
/// all `matchLabels` pairs and all `matchExpressions` must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// One selector requirement: `key <operator> values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    /// One of "In", "NotIn", "Exists", "DoesNotExist".
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Health-check policy for a cluster. Absent fields take the documented
/// defaults at build time (timeout 5s, interval 10s, unhealthy 3, healthy 2,
/// reuse-connection false); absent checker blocks default to an empty TCP
/// checker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub interval: Option<String>,

    #[serde(default)]
    pub interval_jitter: Option<String>,

    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,

    #[serde(default)]
    pub healthy_threshold: Option<u32>,

    #[serde(default)]
    pub reuse_connection: Option<bool>,

    #[serde(default, rename = "httpHealthCheck")]
    pub http: Option<HttpHealthCheckSpec>,

    #[serde(default, rename = "tcpHealthCheck")]
    pub tcp: Option<TcpHealthCheckSpec>,

    #[serde(default, rename = "grpcHealthCheck")]
    pub grpc: Option<GrpcHealthCheckSpec>,
}

/// HTTP checker fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheckSpec {
    pub path: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub request_headers_to_add: Vec<HeaderValueOptionSpec>,

    /// Status ranges considered healthy. Defaults to [200, 299].
    #[serde(default)]
    pub expected_statuses: Vec<HttpStatusRangeSpec>,
}

/// TCP checker fields: byte patterns exchanged with the upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpHealthCheckSpec {
    #[serde(default)]
    pub send: Option<String>,

    #[serde(default)]
    pub receive: Vec<String>,
}

/// gRPC checker fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcHealthCheckSpec {
    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub authority: Option<String>,
}

/// Header added to HTTP health-check requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValueOptionSpec {
    pub header: HeaderValueSpec,
    #[serde(default)]
    pub append: bool,
}

/// Header name/value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValueSpec {
    pub key: String,
    pub value: String,
}

/// Inclusive HTTP status range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpStatusRangeSpec {
    pub start: i64,
    pub end: i64,
}

/// Declarative listener definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub name: String,
    pub address: String,
    pub port: u16,

    #[serde(default)]
    pub listener_filters: Vec<ListenerFilterSpec>,

    pub filter_chains: Vec<FilterChainSpec>,

    #[serde(default)]
    pub access_log: Vec<AccessLogSpec>,
}

/// Listener-level filter; the typed payload is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerFilterSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<serde_json::Value>,
}

/// Ordered set of network filters forming one filter chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterChainSpec {
    pub filters: Vec<FilterSpec>,
}

/// Network filter; the typed payload is mandatory and its absence aborts the
/// listener build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<serde_json::Value>,
}

/// Access-log sink attached to a listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogSpec {
    pub name: String,
    pub typed_config: serde_json::Value,
}

/// Declarative route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfigSpec {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHostSpec>,
}

/// Virtual host within a route table. Each route rule is an open JSON object
/// decoded by the route builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHostSpec {
    pub name: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub routes: Vec<serde_json::Value>,
}
