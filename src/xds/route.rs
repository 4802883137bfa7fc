//! # Route-Table Builder
//!
//! Assembles Envoy route configurations from declarative route-table specs.
//! Individual route rules arrive as open JSON objects; each decodes into a
//! small shape (prefix/path match plus target cluster) and a malformed rule
//! aborts the build.

use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, Route, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost,
};
use serde::Deserialize;

use crate::spec::RouteConfigSpec;
use crate::Result;

#[derive(Debug, Deserialize)]
struct RouteRuleShape {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "match")]
    route_match: Option<RouteMatchShape>,
    route: RouteActionShape,
}

#[derive(Debug, Default, Deserialize)]
struct RouteMatchShape {
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteActionShape {
    cluster: String,
}

/// Build an Envoy route configuration from its declarative spec.
pub fn build_route_config(spec: &RouteConfigSpec) -> Result<RouteConfiguration> {
    let virtual_hosts = spec
        .virtual_hosts
        .iter()
        .map(|vh| {
            let routes = vh
                .routes
                .iter()
                .map(|rule| build_route(&spec.name, rule))
                .collect::<Result<Vec<_>>>()?;
            Ok(VirtualHost {
                name: vh.name.clone(),
                domains: vh.domains.clone(),
                routes,
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RouteConfiguration { name: spec.name.clone(), virtual_hosts, ..Default::default() })
}

fn build_route(route_config: &str, rule: &serde_json::Value) -> Result<Route> {
    let shape: RouteRuleShape = serde_json::from_value(rule.clone()).map_err(|e| {
        crate::Error::malformed_payload(format!(
            "invalid route rule in route config {:?}: {}",
            route_config, e
        ))
    })?;

    let route_match = shape.route_match.unwrap_or_default();
    // An exact path wins over a prefix; neither configured means match-all.
    let path_specifier = match (route_match.path, route_match.prefix) {
        (Some(path), _) => PathSpecifier::Path(path),
        (None, Some(prefix)) => PathSpecifier::Prefix(prefix),
        (None, None) => PathSpecifier::Prefix("/".to_string()),
    };

    Ok(Route {
        name: shape.name.unwrap_or_default(),
        r#match: Some(RouteMatch { path_specifier: Some(path_specifier), ..Default::default() }),
        action: Some(Action::Route(RouteAction {
            cluster_specifier: Some(ClusterSpecifier::Cluster(shape.route.cluster)),
            ..Default::default()
        })),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::VirtualHostSpec;
    use serde_json::json;

    fn route_spec(rules: Vec<serde_json::Value>) -> RouteConfigSpec {
        RouteConfigSpec {
            name: "rt-1".to_string(),
            virtual_hosts: vec![VirtualHostSpec {
                name: "vh-1".to_string(),
                domains: vec!["*".to_string()],
                routes: rules,
            }],
        }
    }

    #[test]
    fn builds_prefix_and_path_routes() {
        let spec = route_spec(vec![
            json!({ "name": "api", "match": { "prefix": "/api" }, "route": { "cluster": "api" } }),
            json!({ "match": { "path": "/healthz" }, "route": { "cluster": "health" } }),
            json!({ "route": { "cluster": "fallback" } }),
        ]);

        let config = build_route_config(&spec).unwrap();
        assert_eq!(config.name, "rt-1");
        assert_eq!(config.virtual_hosts.len(), 1);
        let routes = &config.virtual_hosts[0].routes;
        assert_eq!(routes.len(), 3);

        let specifier = |route: &Route| route.r#match.clone().unwrap().path_specifier.unwrap();
        assert_eq!(specifier(&routes[0]), PathSpecifier::Prefix("/api".to_string()));
        assert_eq!(specifier(&routes[1]), PathSpecifier::Path("/healthz".to_string()));
        assert_eq!(specifier(&routes[2]), PathSpecifier::Prefix("/".to_string()));

        match &routes[2].action {
            Some(Action::Route(action)) => assert_eq!(
                action.cluster_specifier,
                Some(ClusterSpecifier::Cluster("fallback".to_string()))
            ),
            other => panic!("expected route action, got {:?}", other),
        }
    }

    #[test]
    fn malformed_rule_aborts_build() {
        // No route.cluster target.
        let spec = route_spec(vec![json!({ "match": { "prefix": "/" } })]);
        assert!(matches!(build_route_config(&spec), Err(crate::Error::MalformedPayload(_))));
    }
}
