//! # Listener Builder
//!
//! Assembles one Envoy listener from a declarative [`ListenerSpec`]. Every
//! network filter inside every filter chain carries a mandatory typed
//! payload; a missing or malformed one aborts the whole listener build.
//! Listener-level filters and access-log sinks decode their payloads only
//! when present. Filter and filter-chain ordering is a faithful pass-through
//! of the spec: consumers apply filters in array order.

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier, Address, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType,
    listener_filter::ConfigType as ListenerFilterConfigType, Filter, FilterChain, Listener,
    ListenerFilter,
};

use crate::spec::ListenerSpec;
use crate::xds::payload;
use crate::Result;

/// Build an Envoy listener from its declarative spec.
pub fn build_listener(spec: &ListenerSpec) -> Result<Listener> {
    let listener_filters = spec
        .listener_filters
        .iter()
        .map(|lf| {
            let config_type = match &lf.typed_config {
                Some(body) => Some(ListenerFilterConfigType::TypedConfig(payload::decode(body)?)),
                None => None,
            };
            Ok(ListenerFilter { name: lf.name.clone(), config_type, ..Default::default() })
        })
        .collect::<Result<Vec<_>>>()?;

    let filter_chains = spec
        .filter_chains
        .iter()
        .map(|chain| {
            let filters = chain
                .filters
                .iter()
                .map(|f| {
                    let body = f.typed_config.as_ref().ok_or_else(|| {
                        crate::Error::malformed_payload(format!(
                            "network filter {:?} in listener {:?} has no typed config",
                            f.name, spec.name
                        ))
                    })?;
                    Ok(Filter {
                        name: f.name.clone(),
                        config_type: Some(FilterConfigType::TypedConfig(payload::decode(body)?)),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(FilterChain { filters, ..Default::default() })
        })
        .collect::<Result<Vec<_>>>()?;

    let access_log = spec
        .access_log
        .iter()
        .map(|sink| {
            Ok(AccessLog {
                name: sink.name.clone(),
                config_type: Some(AccessLogConfigType::TypedConfig(payload::decode(
                    &sink.typed_config,
                )?)),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Listener {
        name: spec.name.clone(),
        address: Some(Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                address: spec.address.clone(),
                port_specifier: Some(PortSpecifier::PortValue(spec.port.into())),
                ..Default::default()
            })),
        }),
        listener_filters,
        filter_chains,
        access_log,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{AccessLogSpec, FilterChainSpec, FilterSpec, ListenerFilterSpec};
    use serde_json::json;

    fn tcp_proxy_filter(name: &str, cluster: &str) -> FilterSpec {
        FilterSpec {
            name: name.to_string(),
            typed_config: Some(json!({
                "@type": payload::TCP_PROXY_TYPE_URL,
                "cluster": cluster
            })),
        }
    }

    fn listener_spec(filters: Vec<FilterSpec>) -> ListenerSpec {
        ListenerSpec {
            name: "ingress".to_string(),
            address: "0.0.0.0".to_string(),
            port: 10000,
            listener_filters: Vec::new(),
            filter_chains: vec![FilterChainSpec { filters }],
            access_log: Vec::new(),
        }
    }

    #[test]
    fn builds_listener_with_address_and_chain() {
        let listener = build_listener(&listener_spec(vec![tcp_proxy_filter(
            "envoy.filters.network.tcp_proxy",
            "c1",
        )]))
        .unwrap();

        assert_eq!(listener.name, "ingress");
        assert_eq!(listener.filter_chains.len(), 1);
        assert_eq!(listener.filter_chains[0].filters.len(), 1);

        match &listener.address {
            Some(Address { address: Some(AddressType::SocketAddress(socket)) }) => {
                assert_eq!(socket.address, "0.0.0.0");
                assert_eq!(socket.port_specifier, Some(PortSpecifier::PortValue(10000)));
            }
            other => panic!("expected socket address, got {:?}", other),
        }
    }

    #[test]
    fn preserves_filter_order_exactly() {
        let spec = ListenerSpec {
            filter_chains: vec![
                FilterChainSpec {
                    filters: vec![
                        tcp_proxy_filter("filter-b", "c2"),
                        tcp_proxy_filter("filter-a", "c1"),
                        tcp_proxy_filter("filter-c", "c3"),
                    ],
                },
                FilterChainSpec { filters: vec![tcp_proxy_filter("filter-d", "c4")] },
            ],
            ..listener_spec(Vec::new())
        };

        let listener = build_listener(&spec).unwrap();
        let names: Vec<_> =
            listener.filter_chains[0].filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["filter-b", "filter-a", "filter-c"]);
        assert_eq!(listener.filter_chains[1].filters[0].name, "filter-d");
    }

    #[test]
    fn missing_network_filter_payload_aborts_build() {
        let spec = listener_spec(vec![FilterSpec {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            typed_config: None,
        }]);
        assert!(matches!(build_listener(&spec), Err(crate::Error::MalformedPayload(_))));
    }

    #[test]
    fn malformed_network_filter_payload_aborts_build() {
        let spec = listener_spec(vec![FilterSpec {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            typed_config: Some(json!({ "cluster": "c1" })), // no @type
        }]);
        assert!(matches!(build_listener(&spec), Err(crate::Error::MalformedPayload(_))));
    }

    #[test]
    fn listener_filter_payload_is_optional() {
        let mut spec = listener_spec(vec![tcp_proxy_filter("tcp", "c1")]);
        spec.listener_filters = vec![
            ListenerFilterSpec {
                name: "envoy.filters.listener.proxy_protocol".to_string(),
                typed_config: Some(json!({ "@type": payload::PROXY_PROTOCOL_TYPE_URL })),
            },
            ListenerFilterSpec {
                name: "envoy.filters.listener.tls_inspector".to_string(),
                typed_config: None,
            },
        ];

        let listener = build_listener(&spec).unwrap();
        assert_eq!(listener.listener_filters.len(), 2);
        assert!(listener.listener_filters[0].config_type.is_some());
        assert!(listener.listener_filters[1].config_type.is_none());
    }

    #[test]
    fn access_log_sinks_are_decoded_in_order() {
        let mut spec = listener_spec(vec![tcp_proxy_filter("tcp", "c1")]);
        spec.access_log = vec![
            AccessLogSpec {
                name: "envoy.access_loggers.file".to_string(),
                typed_config: json!({
                    "@type": payload::FILE_ACCESS_LOG_TYPE_URL,
                    "path": "/dev/stdout"
                }),
            },
            AccessLogSpec {
                name: "envoy.access_loggers.custom".to_string(),
                typed_config: json!({
                    "@type": "type.googleapis.com/acme.logging.v1.Sink",
                    "target": "collector:9000"
                }),
            },
        ];

        let listener = build_listener(&spec).unwrap();
        assert_eq!(listener.access_log.len(), 2);
        assert_eq!(listener.access_log[0].name, "envoy.access_loggers.file");
        // Unknown sink type decodes to the opaque fallback, not an error.
        assert_eq!(listener.access_log[1].name, "envoy.access_loggers.custom");
    }
}
