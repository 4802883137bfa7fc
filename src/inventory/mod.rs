//! # Inventory and Endpoint Resolution
//!
//! Turns a declarative endpoint selector into a concrete list of network
//! addresses. The inventory itself (the system that knows which members exist
//! and what labels they carry) is an external collaborator behind the
//! [`Inventory`] trait; this module owns selector validation, the
//! address-picking rule, and an in-memory implementation used by tests and
//! the demo binary.
//!
//! Resolution is intentionally uncached: membership may change between
//! snapshot builds, so every build reads the inventory fresh.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::spec::{EndpointSourceSpec, LabelSelector};
use crate::Result;

/// Selector kind resolved against the labeled inventory. Other kinds are
/// reserved and resolve to an empty endpoint list.
pub const MEMBER_SOURCE_KIND: &str = "Member";

/// Classification of a member address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AddressKind {
    /// Address reachable from inside the deployment; the one endpoint
    /// resolution picks.
    Internal,
    External,
    Hostname,
}

/// One address attached to an inventory member.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemberAddress {
    pub kind: AddressKind,
    pub address: String,
}

/// A labeled inventory member with its known addresses.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Member {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub addresses: Vec<MemberAddress>,
}

/// External inventory service: lists members matching a selector.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list_members(&self, selector: &LabelSelector) -> Result<Vec<Member>>;
}

/// In-memory inventory backed by a fixed member list. Applies full selector
/// semantics so tests exercise the same matching rules a real backend would.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    members: Vec<Member>,
}

impl StaticInventory {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn list_members(&self, selector: &LabelSelector) -> Result<Vec<Member>> {
        Ok(self.members.iter().filter(|m| selector_matches(selector, &m.labels)).cloned().collect())
    }
}

/// Validate selector syntax. Invalid syntax is a hard error: silently
/// treating it as "no endpoints" would produce a cluster with zero traffic
/// targets.
pub fn validate_selector(selector: &LabelSelector) -> Result<()> {
    for requirement in &selector.match_expressions {
        if requirement.key.is_empty() {
            return Err(crate::Error::invalid_selector("match expression with empty key"));
        }
        match requirement.operator.as_str() {
            "In" | "NotIn" => {
                if requirement.values.is_empty() {
                    return Err(crate::Error::invalid_selector(format!(
                        "operator {} on key {:?} requires at least one value",
                        requirement.operator, requirement.key
                    )));
                }
            }
            "Exists" | "DoesNotExist" => {
                if !requirement.values.is_empty() {
                    return Err(crate::Error::invalid_selector(format!(
                        "operator {} on key {:?} must not carry values",
                        requirement.operator, requirement.key
                    )));
                }
            }
            other => {
                return Err(crate::Error::invalid_selector(format!(
                    "unknown operator {:?} on key {:?}",
                    other, requirement.key
                )));
            }
        }
    }
    Ok(())
}

/// Evaluate a (validated) selector against a label set.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    for (key, value) in &selector.match_labels {
        if labels.get(key) != Some(value) {
            return false;
        }
    }
    for requirement in &selector.match_expressions {
        let actual = labels.get(&requirement.key);
        let holds = match requirement.operator.as_str() {
            "In" => actual.is_some_and(|v| requirement.values.contains(v)),
            "NotIn" => !actual.is_some_and(|v| requirement.values.contains(v)),
            "Exists" => actual.is_some(),
            "DoesNotExist" => actual.is_none(),
            _ => false,
        };
        if !holds {
            return false;
        }
    }
    true
}

/// Resolve an endpoint source to concrete addresses.
///
/// For each matched member, the first [`AddressKind::Internal`] address is
/// taken; members without one are skipped (partial inventory is expected
/// during scale events). A missing selector resolves to no endpoints; an
/// unknown source kind is reserved and resolves to no endpoints with a
/// warning.
pub async fn resolve_endpoints(
    inventory: &dyn Inventory,
    source: &EndpointSourceSpec,
) -> Result<Vec<String>> {
    if source.kind != MEMBER_SOURCE_KIND {
        warn!(kind = %source.kind, "Unsupported endpoint source kind, resolving to no endpoints");
        return Ok(Vec::new());
    }

    let selector = match &source.selector {
        Some(selector) => selector,
        None => {
            debug!("Endpoint source has no selector, resolving to no endpoints");
            return Ok(Vec::new());
        }
    };

    validate_selector(selector)?;

    let members = inventory.list_members(selector).await?;
    let mut addresses = Vec::new();
    for member in &members {
        match member.addresses.iter().find(|a| a.kind == AddressKind::Internal) {
            Some(addr) => addresses.push(addr.address.clone()),
            None => {
                debug!(member = %member.name, "Member has no internal address, skipping");
            }
        }
    }

    debug!(members = members.len(), addresses = addresses.len(), "Resolved endpoint source");
    Ok(addresses)
}
