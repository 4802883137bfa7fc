use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use planekit::inventory::{Member, StaticInventory};
use planekit::reconciler::{ReconcileOutcome, ReconcileStatus, Reconciler};
use planekit::xds::ServerRegistry;
use planekit::{init_tracing, Config, ControlPlaneSpec, Result, APP_NAME, VERSION};

/// Serve Envoy xDS configuration synthesized from a declarative spec file.
#[derive(Debug, Parser)]
#[command(name = "planekit", version, about)]
struct Cli {
    /// Control-plane spec document (JSON or YAML).
    spec: PathBuf,

    /// Inventory file holding a list of labeled members (JSON or YAML).
    /// Without one, selector-based clusters resolve to no endpoints.
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

fn load_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| planekit::Error::config(format!("invalid YAML in {}: {}", path.display(), e)))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| planekit::Error::config(format!("invalid JSON in {}: {}", path.display(), e)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    info!(app_name = APP_NAME, version = VERSION, "Starting planekit control plane");

    let config = Config::from_env()?;
    info!(
        bind_address = %config.xds.bind_address,
        default_port = config.xds.default_port,
        "Loaded configuration from environment"
    );

    let spec: ControlPlaneSpec = load_document(&cli.spec)?;
    let members: Vec<Member> = match &cli.inventory {
        Some(path) => load_document(path)?,
        None => Vec::new(),
    };
    info!(members = members.len(), "Loaded inventory");

    let key = cli
        .spec
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string();

    let registry = Arc::new(ServerRegistry::new(config.xds.bind_address.clone()));
    let reconciler = Reconciler::new(registry, Arc::new(StaticInventory::new(members)), &config);

    let mut status = ReconcileStatus::default();
    loop {
        match reconciler.reconcile(&key, &spec, &mut status).await {
            ReconcileOutcome::Done => break,
            ReconcileOutcome::Requeue(backoff) => {
                warn!(
                    key = %key,
                    backoff_secs = backoff.as_secs(),
                    status = %serde_json::to_string(&status).unwrap_or_default(),
                    "Reconcile failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        reconciler.reconcile_deleted(&key).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    info!(
        key = %key,
        address = status.server_address.as_deref().unwrap_or("-"),
        version = status.last_snapshot_version,
        "Serving xDS configuration, press Ctrl-C to stop"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    reconciler.reconcile_deleted(&key).await;
    info!("Control plane shutdown completed");
    Ok(())
}
