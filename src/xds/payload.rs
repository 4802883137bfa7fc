//! # Typed Payload Codec
//!
//! Decodes self-describing JSON payloads into Envoy protobuf `Any` messages.
//! A typed payload is a JSON object carrying its type URL under the reserved
//! `@type` key; the tag is authoritative and is stripped before structural
//! decoding so the wire-format decoder never sees it as a field.
//!
//! Recognized type URLs are dispatched through a static registry to serde
//! shapes that build the corresponding envoy-types message and prost-encode
//! it. Unrecognized URLs degrade to an opaque `Any` carrying the stripped
//! JSON verbatim — a deliberate extensibility fallback that must never fail
//! the surrounding snapshot build. Decoding is pure and deterministic:
//! serde_json's map is ordered by key, so re-encoding an unknown payload
//! reproduces the same bytes every time.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, AggregatedConfigSource, ConfigSource,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::FileAccessLog;
use envoy_types::pb::envoy::extensions::filters::listener::proxy_protocol::v3::ProxyProtocol;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier, TcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::raw_buffer::v3::RawBuffer;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::UpstreamTlsContext;
use envoy_types::pb::google::protobuf::Any;
use once_cell::sync::Lazy;
use prost::Message;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::Result;

/// Reserved top-level key carrying the payload's type URL.
pub const TYPE_TAG: &str = "@type";

pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const PROXY_PROTOCOL_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.proxy_protocol.v3.ProxyProtocol";
pub const RAW_BUFFER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.raw_buffer.v3.RawBuffer";
pub const UPSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
pub const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";

type DecodeFn = fn(Value) -> Result<Vec<u8>>;

/// Registry of recognized type URLs. Adding a recognized type is an explicit
/// entry here; everything else takes the opaque fallback.
static REGISTRY: Lazy<HashMap<&'static str, DecodeFn>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, DecodeFn> = HashMap::new();
    registry.insert(TCP_PROXY_TYPE_URL, decode_tcp_proxy);
    registry.insert(HTTP_CONNECTION_MANAGER_TYPE_URL, decode_http_connection_manager);
    registry.insert(PROXY_PROTOCOL_TYPE_URL, decode_proxy_protocol);
    registry.insert(RAW_BUFFER_TYPE_URL, decode_raw_buffer);
    registry.insert(UPSTREAM_TLS_TYPE_URL, decode_upstream_tls);
    registry.insert(FILE_ACCESS_LOG_TYPE_URL, decode_file_access_log);
    registry
});

/// Decode a typed payload into an Envoy `Any`.
///
/// Hard errors (`MalformedPayload`): body is not a JSON object, the `@type`
/// tag is missing/empty/non-string, or a recognized shape is missing a
/// required field. Unknown fields inside a recognized shape are ignored.
pub fn decode(payload: &Value) -> Result<Any> {
    let (type_url, stripped) = strip_type_tag(payload)?;

    match REGISTRY.get(type_url.as_str()) {
        Some(decode_fn) => {
            let value = decode_fn(Value::Object(stripped))?;
            Ok(Any { type_url, value })
        }
        None => {
            debug!(type_url = %type_url, "Unknown payload type, passing through as opaque JSON");
            let value = serde_json::to_vec(&Value::Object(stripped)).map_err(|e| {
                crate::Error::malformed_payload(format!("failed to re-encode payload body: {}", e))
            })?;
            Ok(Any { type_url, value })
        }
    }
}

/// Extract the `@type` tag and return it alongside the body with the tag
/// removed.
pub fn strip_type_tag(payload: &Value) -> Result<(String, Map<String, Value>)> {
    let object = payload
        .as_object()
        .ok_or_else(|| crate::Error::malformed_payload("payload body must be a JSON object"))?;

    let type_url = match object.get(TYPE_TAG) {
        Some(Value::String(url)) if !url.is_empty() => url.clone(),
        Some(Value::String(_)) => {
            return Err(crate::Error::malformed_payload("payload @type tag is empty"))
        }
        Some(_) => {
            return Err(crate::Error::malformed_payload("payload @type tag must be a string"))
        }
        None => return Err(crate::Error::malformed_payload("payload is missing its @type tag")),
    };

    let mut stripped = object.clone();
    stripped.remove(TYPE_TAG);
    Ok((type_url, stripped))
}

fn shape<T: for<'de> Deserialize<'de>>(type_url: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| {
        crate::Error::malformed_payload(format!("invalid {} payload: {}", type_url, e))
    })
}

// Shapes accept both snake_case and camelCase keys, matching proto-JSON
// conventions for typed configs.
#[derive(Debug, Deserialize)]
struct TcpProxyShape {
    #[serde(default, alias = "statPrefix")]
    stat_prefix: Option<String>,
    cluster: String,
}

fn decode_tcp_proxy(body: Value) -> Result<Vec<u8>> {
    let shape: TcpProxyShape = shape("TcpProxy", body)?;
    let message = TcpProxy {
        stat_prefix: shape.stat_prefix.unwrap_or_else(|| "tcp".to_string()),
        cluster_specifier: Some(ClusterSpecifier::Cluster(shape.cluster)),
        ..Default::default()
    };
    Ok(message.encode_to_vec())
}

#[derive(Debug, Deserialize)]
struct HttpConnectionManagerShape {
    #[serde(default, alias = "statPrefix")]
    stat_prefix: Option<String>,
    #[serde(default)]
    rds: Option<RdsShape>,
}

#[derive(Debug, Deserialize)]
struct RdsShape {
    #[serde(alias = "routeConfigName")]
    route_config_name: String,
}

fn decode_http_connection_manager(body: Value) -> Result<Vec<u8>> {
    let shape: HttpConnectionManagerShape = shape("HttpConnectionManager", body)?;
    let route_specifier = shape.rds.map(|rds| {
        RouteSpecifier::Rds(Rds {
            route_config_name: rds.route_config_name,
            config_source: Some(ConfigSource {
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource::default(),
                )),
                ..Default::default()
            }),
        })
    });
    let message = HttpConnectionManager {
        stat_prefix: shape.stat_prefix.unwrap_or_else(|| "ingress_http".to_string()),
        route_specifier,
        ..Default::default()
    };
    Ok(message.encode_to_vec())
}

fn decode_proxy_protocol(_body: Value) -> Result<Vec<u8>> {
    Ok(ProxyProtocol::default().encode_to_vec())
}

fn decode_raw_buffer(_body: Value) -> Result<Vec<u8>> {
    Ok(RawBuffer::default().encode_to_vec())
}

#[derive(Debug, Deserialize)]
struct UpstreamTlsShape {
    #[serde(default)]
    sni: Option<String>,
}

fn decode_upstream_tls(body: Value) -> Result<Vec<u8>> {
    let shape: UpstreamTlsShape = shape("UpstreamTlsContext", body)?;
    let message =
        UpstreamTlsContext { sni: shape.sni.unwrap_or_default(), ..Default::default() };
    Ok(message.encode_to_vec())
}

#[derive(Debug, Deserialize)]
struct FileAccessLogShape {
    path: String,
}

fn decode_file_access_log(body: Value) -> Result<Vec<u8>> {
    let shape: FileAccessLogShape = shape("FileAccessLog", body)?;
    let message = FileAccessLog { path: shape.path, ..Default::default() };
    Ok(message.encode_to_vec())
}
