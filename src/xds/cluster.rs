//! # Cluster Builder
//!
//! Assembles one Envoy cluster (plus its EDS load assignment) from a
//! declarative [`ClusterSpec`]: resolves endpoint membership through the
//! inventory, decodes the optional transport-security payload, and constructs
//! the health-check policy with its documented defaults.
//!
//! Failure policy: malformed payloads, invalid selectors, and unparsable
//! durations are hard errors that abort the snapshot build. Unrecognized
//! discovery-type / LB-policy strings and empty endpoint sets are soft
//! conditions: they are logged and fall back to defaults.

use std::time::Duration;

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy},
    Cluster,
};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType,
    health_check::{self, HealthChecker},
    socket_address::PortSpecifier,
    transport_socket::ConfigType as TransportSocketConfigType,
    Address, HeaderValue, HeaderValueOption, HealthCheck, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::r#type::v3::Int64Range;
use envoy_types::pb::google::protobuf::{
    BoolValue, Duration as PbDuration, UInt32Value,
};
use tracing::{debug, warn};

use crate::inventory::{resolve_endpoints, Inventory};
use crate::spec::{ClusterSpec, HealthCheckSpec, HttpHealthCheckSpec};
use crate::xds::payload;
use crate::Result;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
const DEFAULT_HEALTHY_THRESHOLD: u32 = 2;

/// Builds Envoy clusters from declarative specs, resolving endpoint
/// membership through the inventory on every build.
pub struct ClusterBuilder<'a> {
    inventory: &'a dyn Inventory,
}

impl<'a> ClusterBuilder<'a> {
    pub fn new(inventory: &'a dyn Inventory) -> Self {
        Self { inventory }
    }

    /// Build the cluster and its load assignment. The load assignment is
    /// returned separately so the assembler can register it as an EDS
    /// resource alongside the cluster.
    pub async fn build(&self, spec: &ClusterSpec) -> Result<(Cluster, ClusterLoadAssignment)> {
        let mut addresses: Vec<String> = Vec::new();
        let mut endpoint_port: u16 = 0;

        if let Some(source) = spec.load_assignment.as_ref().and_then(|la| la.endpoints_from.as_ref())
        {
            addresses = resolve_endpoints(self.inventory, source).await?;
            endpoint_port = match source.port {
                Some(port) => port,
                None => {
                    warn!(cluster = %spec.name, "Endpoint source declares no port, defaulting to 0");
                    0
                }
            };
            if addresses.is_empty() {
                debug!(cluster = %spec.name, "No endpoints matched, building empty load assignment");
            }
        }

        let load_assignment = build_load_assignment(&spec.name, &addresses, endpoint_port);

        let connect_timeout = match &spec.connect_timeout {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let transport_socket = match &spec.transport_socket {
            Some(socket) => {
                let config_type = match &socket.typed_config {
                    Some(body) => Some(TransportSocketConfigType::TypedConfig(payload::decode(body)?)),
                    None => None,
                };
                Some(TransportSocket { name: socket.name.clone(), config_type })
            }
            None => None,
        };

        let health_checks = match &spec.health_check {
            Some(hc) => vec![build_health_check(hc)?],
            None => Vec::new(),
        };

        let cluster = Cluster {
            name: spec.name.clone(),
            connect_timeout: Some(to_pb_duration(connect_timeout)),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(
                map_discovery_type(&spec.name, spec.discovery_type.as_deref()) as i32,
            )),
            lb_policy: map_lb_policy(&spec.name, spec.lb_policy.as_deref()) as i32,
            load_assignment: Some(load_assignment.clone()),
            transport_socket,
            health_checks,
            ..Default::default()
        };

        Ok((cluster, load_assignment))
    }
}

fn build_load_assignment(name: &str, addresses: &[String], port: u16) -> ClusterLoadAssignment {
    let lb_endpoints = addresses
        .iter()
        .map(|address| LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
                address: Some(Address {
                    address: Some(AddressType::SocketAddress(SocketAddress {
                        address: address.clone(),
                        port_specifier: Some(PortSpecifier::PortValue(port.into())),
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })),
            ..Default::default()
        })
        .collect();

    ClusterLoadAssignment {
        cluster_name: name.to_string(),
        endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
        ..Default::default()
    }
}

/// Unrecognized discovery types fall back to strict DNS. Deliberate leniency:
/// existing specs rely on it.
fn map_discovery_type(cluster: &str, raw: Option<&str>) -> DiscoveryType {
    match raw {
        None | Some("") | Some("strict_dns") => DiscoveryType::StrictDns,
        Some("static") => DiscoveryType::Static,
        Some(other) => {
            warn!(cluster, discovery_type = other, "Unrecognized discovery type, defaulting to strict_dns");
            DiscoveryType::StrictDns
        }
    }
}

/// Unrecognized LB policies fall back to round robin.
fn map_lb_policy(cluster: &str, raw: Option<&str>) -> LbPolicy {
    match raw {
        None | Some("") | Some("round_robin") => LbPolicy::RoundRobin,
        Some("least_request") => LbPolicy::LeastRequest,
        Some(other) => {
            warn!(cluster, lb_policy = other, "Unrecognized LB policy, defaulting to round_robin");
            LbPolicy::RoundRobin
        }
    }
}

/// Build the health-check policy. Absent fields take the documented defaults;
/// exactly one checker variant is attached, preferring HTTP, then TCP, then
/// gRPC, and defaulting to an empty TCP checker when none is configured.
pub fn build_health_check(spec: &HealthCheckSpec) -> Result<HealthCheck> {
    let timeout = parse_duration_or(spec.timeout.as_deref(), DEFAULT_HEALTH_CHECK_TIMEOUT)
        .map_err(|e| annotate_duration(e, "health check timeout"))?;
    let interval = parse_duration_or(spec.interval.as_deref(), DEFAULT_HEALTH_CHECK_INTERVAL)
        .map_err(|e| annotate_duration(e, "health check interval"))?;
    let interval_jitter = spec
        .interval_jitter
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| annotate_duration(e, "health check interval jitter"))?;

    let health_checker = if let Some(http) = &spec.http {
        HealthChecker::HttpHealthCheck(build_http_health_check(http))
    } else if let Some(tcp) = &spec.tcp {
        HealthChecker::TcpHealthCheck(health_check::TcpHealthCheck {
            send: tcp.send.as_ref().map(|s| text_payload(s)),
            receive: tcp.receive.iter().map(|s| text_payload(s)).collect(),
            ..Default::default()
        })
    } else if let Some(grpc) = &spec.grpc {
        HealthChecker::GrpcHealthCheck(health_check::GrpcHealthCheck {
            service_name: grpc.service_name.clone().unwrap_or_default(),
            authority: grpc.authority.clone().unwrap_or_default(),
            ..Default::default()
        })
    } else {
        HealthChecker::TcpHealthCheck(health_check::TcpHealthCheck::default())
    };

    Ok(HealthCheck {
        timeout: Some(to_pb_duration(timeout)),
        interval: Some(to_pb_duration(interval)),
        interval_jitter: interval_jitter.map(to_pb_duration),
        unhealthy_threshold: Some(UInt32Value {
            value: spec.unhealthy_threshold.unwrap_or(DEFAULT_UNHEALTHY_THRESHOLD),
        }),
        healthy_threshold: Some(UInt32Value {
            value: spec.healthy_threshold.unwrap_or(DEFAULT_HEALTHY_THRESHOLD),
        }),
        reuse_connection: Some(BoolValue { value: spec.reuse_connection.unwrap_or(false) }),
        health_checker: Some(health_checker),
        ..Default::default()
    })
}

fn build_http_health_check(spec: &HttpHealthCheckSpec) -> health_check::HttpHealthCheck {
    let expected_statuses = if spec.expected_statuses.is_empty() {
        vec![Int64Range { start: 200, end: 299 }]
    } else {
        spec.expected_statuses.iter().map(|r| Int64Range { start: r.start, end: r.end }).collect()
    };

    let request_headers_to_add = spec
        .request_headers_to_add
        .iter()
        .map(|h| HeaderValueOption {
            header: Some(HeaderValue {
                key: h.header.key.clone(),
                value: h.header.value.clone(),
                ..Default::default()
            }),
            #[allow(deprecated)]
            append: Some(BoolValue { value: h.append }),
            ..Default::default()
        })
        .collect();

    health_check::HttpHealthCheck {
        path: spec.path.clone(),
        host: spec.host.clone().unwrap_or_default(),
        request_headers_to_add,
        expected_statuses,
        ..Default::default()
    }
}

fn text_payload(text: &str) -> health_check::Payload {
    health_check::Payload {
        payload: Some(health_check::payload::Payload::Text(text.to_string())),
    }
}

fn to_pb_duration(duration: Duration) -> PbDuration {
    PbDuration { seconds: duration.as_secs() as i64, nanos: duration.subsec_nanos() as i32 }
}

fn parse_duration_or(raw: Option<&str>, default: Duration) -> Result<Duration> {
    match raw {
        Some(raw) if !raw.is_empty() => parse_duration(raw),
        _ => Ok(default),
    }
}

fn annotate_duration(err: crate::Error, context: &str) -> crate::Error {
    match err {
        crate::Error::InvalidDuration { value, reason } => crate::Error::InvalidDuration {
            value,
            reason: format!("{}: {}", context, reason),
        },
        other => other,
    }
}

/// Parse a Go-style duration string: one or more `<number><unit>` segments
/// with units `ns`, `us`, `ms`, `s`, `m`, `h` ("1.5s", "1h30m", "250ms").
pub(crate) fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::invalid_duration(input, "empty duration string"));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| crate::Error::invalid_duration(input, "missing unit suffix"))?;
        if number_len == 0 {
            return Err(crate::Error::invalid_duration(input, "expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| crate::Error::invalid_duration(input, "invalid number"))?;

        let unit_rest = &rest[number_len..];
        let (seconds_per_unit, unit_len) = if unit_rest.starts_with("ns") {
            (1e-9, 2)
        } else if unit_rest.starts_with("us") {
            (1e-6, 2)
        } else if unit_rest.starts_with("ms") {
            (1e-3, 2)
        } else if unit_rest.starts_with('s') {
            (1.0, 1)
        } else if unit_rest.starts_with('m') {
            (60.0, 1)
        } else if unit_rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return Err(crate::Error::invalid_duration(input, "unknown unit"));
        };

        let segment = Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|_| crate::Error::invalid_duration(input, "duration out of range"))?;
        total = total
            .checked_add(segment)
            .ok_or_else(|| crate::Error::invalid_duration(input, "duration out of range"))?;
        rest = &unit_rest[unit_len..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{AddressKind, Member, MemberAddress, StaticInventory};
    use crate::spec::{
        EndpointSourceSpec, GrpcHealthCheckSpec, HeaderValueOptionSpec, HeaderValueSpec,
        HttpStatusRangeSpec, LabelSelector, LoadAssignmentSpec, TcpHealthCheckSpec,
        TransportSocketSpec,
    };

    fn bare_cluster(name: &str) -> ClusterSpec {
        ClusterSpec {
            name: name.to_string(),
            discovery_type: None,
            lb_policy: None,
            connect_timeout: None,
            transport_socket: None,
            load_assignment: None,
            health_check: None,
        }
    }

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("invalid-duration").is_err());
    }

    #[test]
    fn oversized_durations_are_hard_errors() {
        // A finite-but-huge product must not panic the conversion.
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(crate::Error::InvalidDuration { .. })
        ));
        // Segment sum overflowing the representable range is an error too.
        assert!(matches!(
            parse_duration("18446744073709551615s1h"),
            Err(crate::Error::InvalidDuration { .. })
        ));
        // The same string through a health-check field stays an error.
        let spec = HealthCheckSpec {
            timeout: Some("99999999999999999999h".to_string()),
            ..Default::default()
        };
        assert!(matches!(build_health_check(&spec), Err(crate::Error::InvalidDuration { .. })));
    }

    #[test]
    fn http_health_check_full_config() {
        let spec = HealthCheckSpec {
            timeout: Some("5s".to_string()),
            interval: Some("10s".to_string()),
            interval_jitter: Some("1s".to_string()),
            unhealthy_threshold: Some(3),
            healthy_threshold: Some(2),
            reuse_connection: Some(true),
            http: Some(HttpHealthCheckSpec {
                path: "/health".to_string(),
                host: Some("example.com".to_string()),
                request_headers_to_add: vec![HeaderValueOptionSpec {
                    header: HeaderValueSpec {
                        key: "X-Health-Check".to_string(),
                        value: "envoy".to_string(),
                    },
                    append: false,
                }],
                expected_statuses: vec![HttpStatusRangeSpec { start: 200, end: 299 }],
            }),
            ..Default::default()
        };

        let hc = build_health_check(&spec).unwrap();
        assert_eq!(hc.timeout, Some(PbDuration { seconds: 5, nanos: 0 }));
        assert_eq!(hc.interval, Some(PbDuration { seconds: 10, nanos: 0 }));
        assert_eq!(hc.interval_jitter, Some(PbDuration { seconds: 1, nanos: 0 }));
        assert_eq!(hc.unhealthy_threshold, Some(UInt32Value { value: 3 }));
        assert_eq!(hc.healthy_threshold, Some(UInt32Value { value: 2 }));
        assert_eq!(hc.reuse_connection, Some(BoolValue { value: true }));

        match hc.health_checker {
            Some(HealthChecker::HttpHealthCheck(http)) => {
                assert_eq!(http.path, "/health");
                assert_eq!(http.host, "example.com");
                assert_eq!(http.request_headers_to_add.len(), 1);
                let header = &http.request_headers_to_add[0];
                assert_eq!(header.header.as_ref().unwrap().key, "X-Health-Check");
                assert_eq!(header.header.as_ref().unwrap().value, "envoy");
                assert_eq!(http.expected_statuses, vec![Int64Range { start: 200, end: 299 }]);
            }
            other => panic!("expected HTTP checker, got {:?}", other),
        }
    }

    #[test]
    fn http_health_check_defaults_expected_statuses() {
        let spec = HealthCheckSpec {
            http: Some(HttpHealthCheckSpec {
                path: "/health".to_string(),
                host: None,
                request_headers_to_add: Vec::new(),
                expected_statuses: Vec::new(),
            }),
            ..Default::default()
        };

        let hc = build_health_check(&spec).unwrap();
        match hc.health_checker {
            Some(HealthChecker::HttpHealthCheck(http)) => {
                assert!(http.host.is_empty());
                assert!(http.request_headers_to_add.is_empty());
                assert_eq!(http.expected_statuses, vec![Int64Range { start: 200, end: 299 }]);
            }
            other => panic!("expected HTTP checker, got {:?}", other),
        }
    }

    #[test]
    fn tcp_health_check_payloads() {
        let spec = HealthCheckSpec {
            timeout: Some("3s".to_string()),
            interval: Some("5s".to_string()),
            unhealthy_threshold: Some(2),
            healthy_threshold: Some(1),
            reuse_connection: Some(false),
            tcp: Some(TcpHealthCheckSpec {
                send: Some("PING".to_string()),
                receive: vec!["PONG".to_string()],
            }),
            ..Default::default()
        };

        let hc = build_health_check(&spec).unwrap();
        assert_eq!(hc.timeout, Some(PbDuration { seconds: 3, nanos: 0 }));
        match hc.health_checker {
            Some(HealthChecker::TcpHealthCheck(tcp)) => {
                assert_eq!(
                    tcp.send,
                    Some(health_check::Payload {
                        payload: Some(health_check::payload::Payload::Text("PING".to_string()))
                    })
                );
                assert_eq!(tcp.receive.len(), 1);
                assert_eq!(
                    tcp.receive[0].payload,
                    Some(health_check::payload::Payload::Text("PONG".to_string()))
                );
            }
            other => panic!("expected TCP checker, got {:?}", other),
        }
    }

    #[test]
    fn grpc_health_check_fields() {
        let spec = HealthCheckSpec {
            grpc: Some(GrpcHealthCheckSpec {
                service_name: Some("myapp.v1.HealthService".to_string()),
                authority: Some("grpc-service.local".to_string()),
            }),
            ..Default::default()
        };

        let hc = build_health_check(&spec).unwrap();
        match hc.health_checker {
            Some(HealthChecker::GrpcHealthCheck(grpc)) => {
                assert_eq!(grpc.service_name, "myapp.v1.HealthService");
                assert_eq!(grpc.authority, "grpc-service.local");
            }
            other => panic!("expected gRPC checker, got {:?}", other),
        }
    }

    #[test]
    fn empty_health_check_takes_all_defaults() {
        let hc = build_health_check(&HealthCheckSpec::default()).unwrap();
        assert_eq!(hc.timeout, Some(PbDuration { seconds: 5, nanos: 0 }));
        assert_eq!(hc.interval, Some(PbDuration { seconds: 10, nanos: 0 }));
        assert_eq!(hc.interval_jitter, None);
        assert_eq!(hc.unhealthy_threshold, Some(UInt32Value { value: 3 }));
        assert_eq!(hc.healthy_threshold, Some(UInt32Value { value: 2 }));
        assert_eq!(hc.reuse_connection, Some(BoolValue { value: false }));
        match hc.health_checker {
            Some(HealthChecker::TcpHealthCheck(tcp)) => {
                assert!(tcp.send.is_none());
                assert!(tcp.receive.is_empty());
            }
            other => panic!("expected default TCP checker, got {:?}", other),
        }
    }

    #[test]
    fn invalid_durations_are_hard_errors() {
        let spec =
            HealthCheckSpec { timeout: Some("invalid-duration".to_string()), ..Default::default() };
        assert!(matches!(build_health_check(&spec), Err(crate::Error::InvalidDuration { .. })));

        let spec = HealthCheckSpec {
            timeout: Some("1s".to_string()),
            interval: Some("invalid-duration".to_string()),
            ..Default::default()
        };
        match build_health_check(&spec) {
            Err(crate::Error::InvalidDuration { reason, .. }) => {
                assert!(reason.contains("health check interval"));
            }
            other => panic!("expected InvalidDuration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn builds_cluster_with_resolved_endpoints() {
        let inventory = StaticInventory::new(vec![Member {
            name: "node-1".to_string(),
            labels: [("role".to_string(), "edge".to_string())].into_iter().collect(),
            addresses: vec![MemberAddress {
                kind: AddressKind::Internal,
                address: "10.0.0.1".to_string(),
            }],
        }]);

        let mut spec = bare_cluster("backend");
        spec.load_assignment = Some(LoadAssignmentSpec {
            endpoints_from: Some(EndpointSourceSpec {
                kind: "Member".to_string(),
                selector: Some(LabelSelector {
                    match_labels: [("role".to_string(), "edge".to_string())].into_iter().collect(),
                    match_expressions: Vec::new(),
                }),
                port: Some(8080),
            }),
        });

        let builder = ClusterBuilder::new(&inventory);
        let (cluster, cla) = builder.build(&spec).await.unwrap();

        assert_eq!(cluster.name, "backend");
        assert_eq!(cla.cluster_name, "backend");
        assert_eq!(cla.endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 1);
        // Default discovery type and LB policy apply.
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32))
        );
        assert_eq!(cluster.lb_policy, LbPolicy::RoundRobin as i32);
        assert_eq!(cluster.connect_timeout, Some(PbDuration { seconds: 1, nanos: 0 }));
    }

    #[tokio::test]
    async fn missing_endpoint_port_defaults_to_zero() {
        let inventory = StaticInventory::new(vec![Member {
            name: "node-1".to_string(),
            labels: [("role".to_string(), "edge".to_string())].into_iter().collect(),
            addresses: vec![MemberAddress {
                kind: AddressKind::Internal,
                address: "10.0.0.1".to_string(),
            }],
        }]);

        let mut spec = bare_cluster("backend");
        spec.load_assignment = Some(LoadAssignmentSpec {
            endpoints_from: Some(EndpointSourceSpec {
                kind: "Member".to_string(),
                selector: Some(LabelSelector {
                    match_labels: [("role".to_string(), "edge".to_string())].into_iter().collect(),
                    match_expressions: Vec::new(),
                }),
                port: None,
            }),
        });

        let builder = ClusterBuilder::new(&inventory);
        let (_, cla) = builder.build(&spec).await.unwrap();
        let endpoint = match &cla.endpoints[0].lb_endpoints[0].host_identifier {
            Some(HostIdentifier::Endpoint(endpoint)) => endpoint,
            other => panic!("expected endpoint, got {:?}", other),
        };
        match endpoint.address.as_ref().and_then(|a| a.address.as_ref()) {
            Some(AddressType::SocketAddress(socket)) => {
                assert_eq!(socket.port_specifier, Some(PortSpecifier::PortValue(0)));
            }
            other => panic!("expected socket address, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unrecognized_strings_fall_back_without_error() {
        let inventory = StaticInventory::default();
        let mut spec = bare_cluster("backend");
        spec.discovery_type = Some("quantum_dns".to_string());
        spec.lb_policy = Some("psychic".to_string());

        let builder = ClusterBuilder::new(&inventory);
        let (cluster, _) = builder.build(&spec).await.unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32))
        );
        assert_eq!(cluster.lb_policy, LbPolicy::RoundRobin as i32);
    }

    #[tokio::test]
    async fn static_discovery_type_is_recognized() {
        let inventory = StaticInventory::default();
        let mut spec = bare_cluster("backend");
        spec.discovery_type = Some("static".to_string());
        spec.lb_policy = Some("least_request".to_string());

        let builder = ClusterBuilder::new(&inventory);
        let (cluster, _) = builder.build(&spec).await.unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::Static as i32))
        );
        assert_eq!(cluster.lb_policy, LbPolicy::LeastRequest as i32);
    }

    #[tokio::test]
    async fn transport_socket_payload_is_decoded() {
        let inventory = StaticInventory::default();
        let mut spec = bare_cluster("backend");
        spec.transport_socket = Some(TransportSocketSpec {
            name: "envoy.transport_sockets.tls".to_string(),
            typed_config: Some(serde_json::json!({
                "@type": payload::UPSTREAM_TLS_TYPE_URL,
                "sni": "backend.internal"
            })),
        });

        let builder = ClusterBuilder::new(&inventory);
        let (cluster, _) = builder.build(&spec).await.unwrap();
        let socket = cluster.transport_socket.unwrap();
        assert_eq!(socket.name, "envoy.transport_sockets.tls");
        match socket.config_type {
            Some(TransportSocketConfigType::TypedConfig(any)) => {
                assert_eq!(any.type_url, payload::UPSTREAM_TLS_TYPE_URL);
            }
            other => panic!("expected typed config, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_connect_timeout_aborts_build() {
        let inventory = StaticInventory::default();
        let mut spec = bare_cluster("backend");
        spec.connect_timeout = Some("soon".to_string());

        let builder = ClusterBuilder::new(&inventory);
        let result = builder.build(&spec).await;
        assert!(matches!(result, Err(crate::Error::InvalidDuration { .. })));
    }
}
