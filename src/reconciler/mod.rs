//! # Reconciliation
//!
//! Drives one control-plane spec to its desired state: a running xDS server
//! on the requested port with the latest snapshot published for every
//! consumer identity. Each pass reports its observations as a phase plus a
//! small set of conditions, and any failure requeues the spec with a fixed
//! backoff instead of propagating.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::inventory::Inventory;
use crate::spec::ControlPlaneSpec;
use crate::xds::lifecycle::ServerRegistry;
use crate::xds::snapshot::SnapshotBuilder;
use crate::Error;

pub const CONDITION_SERVER_READY: &str = "ServerReady";
pub const CONDITION_SNAPSHOT_READY: &str = "SnapshotReady";
pub const CONDITION_READY: &str = "Ready";

/// Coarse summary of where a spec is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum Phase {
    #[default]
    Pending,
    Ready,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// One observed condition, in the style of Kubernetes status conditions.
/// The transition timestamp moves only when the status itself flips.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Status block a reconcile pass writes back for a spec.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStatus {
    pub phase: Phase,
    pub conditions: Vec<Condition>,
    pub connected_node_ids: Vec<String>,
    pub server_address: Option<String>,
    pub last_snapshot_version: Option<u64>,
}

impl ReconcileStatus {
    /// Set a condition, preserving the transition timestamp when the status
    /// has not changed.
    pub fn set_condition(
        &mut self,
        r#type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let now = Utc::now();
        match self.conditions.iter_mut().find(|c| c.r#type == r#type) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.into();
                existing.message = message.into();
            }
            None => self.conditions.push(Condition {
                r#type: r#type.to_string(),
                status,
                reason: reason.into(),
                message: message.into(),
                last_transition_time: now,
            }),
        }
    }

    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

/// What the driver should do with the spec after this pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcileOutcome {
    Done,
    Requeue(Duration),
}

/// Per-pass reconciler. Owns the server registry and the snapshot builder;
/// the driver calls [`reconcile`](Reconciler::reconcile) for live specs and
/// [`reconcile_deleted`](Reconciler::reconcile_deleted) when one goes away.
pub struct Reconciler {
    registry: Arc<ServerRegistry>,
    builder: SnapshotBuilder,
    default_port: u16,
    retry_backoff: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<ServerRegistry>,
        inventory: Arc<dyn Inventory>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            builder: SnapshotBuilder::new(inventory),
            default_port: config.xds.default_port,
            retry_backoff: config.reconcile.retry_backoff,
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    /// One reconcile pass: server up, snapshot assembled, snapshot
    /// published. The first failing step marks the spec `Error` and
    /// requeues it; nothing here panics or propagates.
    pub async fn reconcile(
        &self,
        key: &str,
        spec: &ControlPlaneSpec,
        status: &mut ReconcileStatus,
    ) -> ReconcileOutcome {
        let port = spec.port_or(self.default_port);

        let instance = match self.registry.ensure_server(key, port).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(key = %key, port, error = %e, "Failed to ensure xDS server");
                status.set_condition(
                    CONDITION_SERVER_READY,
                    ConditionStatus::False,
                    error_reason(&e),
                    e.to_string(),
                );
                return self.fail(status, &e);
            }
        };
        status.set_condition(
            CONDITION_SERVER_READY,
            ConditionStatus::True,
            "ServerRunning",
            format!("xDS server listening on port {}", port),
        );
        status.server_address =
            Some(format!("{}:{}", self.registry.bind_address(), instance.port()));

        let snapshot = match self.builder.assemble(spec).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to assemble snapshot");
                status.set_condition(
                    CONDITION_SNAPSHOT_READY,
                    ConditionStatus::False,
                    error_reason(&e),
                    e.to_string(),
                );
                return self.fail(status, &e);
            }
        };

        let node_ids = spec.node_ids();
        let version = match instance.publish(&snapshot, &node_ids) {
            Ok(version) => version,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to publish snapshot");
                status.set_condition(
                    CONDITION_SNAPSHOT_READY,
                    ConditionStatus::False,
                    error_reason(&e),
                    e.to_string(),
                );
                return self.fail(status, &e);
            }
        };

        status.set_condition(
            CONDITION_SNAPSHOT_READY,
            ConditionStatus::True,
            "SnapshotPublished",
            format!("snapshot version {} published", version),
        );
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::True,
            "Reconciled",
            "server running and snapshot published",
        );
        status.phase = Phase::Ready;
        status.connected_node_ids = node_ids;
        status.last_snapshot_version = Some(version);

        info!(key = %key, port, version, "Reconciled control-plane spec");
        ReconcileOutcome::Done
    }

    /// Tear down everything owned on behalf of a deleted spec. The server's
    /// port is free again when this returns.
    pub async fn reconcile_deleted(&self, key: &str) -> ReconcileOutcome {
        self.registry.remove_server(key).await;
        info!(key = %key, "Reconciled deletion");
        ReconcileOutcome::Done
    }

    fn fail(&self, status: &mut ReconcileStatus, error: &Error) -> ReconcileOutcome {
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::False,
            error_reason(error),
            error.to_string(),
        );
        status.phase = Phase::Error;
        ReconcileOutcome::Requeue(self.retry_backoff)
    }
}

/// Stable machine-readable reason for a condition, derived from the error
/// taxonomy.
fn error_reason(error: &Error) -> &'static str {
    match error {
        Error::MalformedPayload(_) => "MalformedPayload",
        Error::InvalidSelector(_) => "InvalidSelector",
        Error::InvalidDuration { .. } => "InvalidDuration",
        Error::Bind(_) => "BindFailure",
        Error::Publish(_) => "PublishFailure",
        Error::Config(_) => "InvalidConfig",
        _ => "InternalError",
    }
}
