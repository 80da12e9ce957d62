use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use common::constants::DEFAULT_CLUSTER;
use common::schemas::NodeKind;
use common::url_utils::parse_socket_addr;

use crate::core::node::NodeInfo;
use crate::core::ops::{HttpOverlay, HttpPinger, ShellRuntime, SystemMounter, init_scratch};
use crate::core::refresh::registry_refresh_loop;
use crate::core::registry::Registry;
use crate::core::routes::router;
use crate::core::state::{ControlState, ControlStateConfig};
use crate::core::store::KvDb;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// RocksDB directory for node and mount records
    #[arg(long, default_value = "./data/index")]
    index: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:7070")]
    listen: String,

    /// Stable node id; generated and persisted on first start
    #[arg(long)]
    node_id: Option<String>,

    /// Hostname to advertise; defaults to the machine hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Address peers use to reach this node
    #[arg(long, default_value = "127.0.0.1")]
    advertise_address: String,

    /// Cluster this node belongs to
    #[arg(long, default_value = DEFAULT_CLUSTER)]
    cluster: String,

    /// Overlay mesh address, when the node participates in one
    #[arg(long)]
    overlay_ip: Option<String>,

    /// Publicly routable address, when one exists
    #[arg(long)]
    public_ip: Option<String>,

    /// Registry refresh interval (seconds)
    #[arg(long, default_value_t = 10)]
    refresh_secs: u64,

    /// Per-probe timeout for refresh and diagnostics (seconds)
    #[arg(long, default_value_t = 3)]
    probe_timeout_secs: u64,

    /// Timeout for proxied peer requests (seconds)
    #[arg(long, default_value_t = 10)]
    proxy_timeout_secs: u64,

    /// Transfer token lifetime (seconds)
    #[arg(long, default_value_t = 300)]
    token_ttl_secs: u64,

    /// Scratch directory for migration archives
    #[arg(long, default_value = "./data/scratch")]
    scratch: PathBuf,

    /// Container tooling binary
    #[arg(long, default_value = "docker")]
    container_cli: String,

    /// Virtual machine tooling binary
    #[arg(long, default_value = "virsh")]
    vm_cli: String,
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let db = KvDb::open(&serve_args.index)?;
    let registry = Registry::load(db.clone())?;

    let socket_addr = parse_socket_addr(&serve_args.listen)?;
    ensure_self_node(&registry, &serve_args, socket_addr.port())?;
    init_scratch(&serve_args.scratch).await?;

    let state = ControlState::new(ControlStateConfig {
        db,
        registry,
        runtime: Arc::new(ShellRuntime::new(
            serve_args.container_cli.clone(),
            serve_args.vm_cli.clone(),
            serve_args.scratch.clone(),
        )),
        mounter: Arc::new(SystemMounter),
        pinger: Arc::new(HttpPinger::new()),
        overlay: Arc::new(HttpOverlay::new()),
        proxy_timeout: Duration::from_secs(serve_args.proxy_timeout_secs),
        probe_timeout: Duration::from_secs(serve_args.probe_timeout_secs),
        scratch_dir: serve_args.scratch.clone(),
        token_ttl: Duration::from_secs(serve_args.token_ttl_secs),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    });

    // Spawn registry refresher
    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let refresher_handle = tokio::spawn(registry_refresh_loop(
        state.clone(),
        Duration::from_secs(serve_args.refresh_secs),
        shutdown_rx,
    ));

    let app = router(state.clone());
    // Self-addressed proxy requests dispatch through this same router
    state.set_local_router(app.clone());

    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!("listening on {}", serve_args.listen);

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    // Stop refresher
    let _ = shutdown_tx.send(true);
    let _ = refresher_handle.await;

    Ok(())
}

/// Make sure the registry carries exactly this daemon's own record, carrying
/// the persisted node id across restarts unless one is given explicitly.
fn ensure_self_node(registry: &Registry, args: &ServeArgs, port: u16) -> anyhow::Result<()> {
    let existing = registry.list()?.into_iter().find(|n| n.is_self);

    if let Some(existing) = &existing
        && args
            .node_id
            .as_deref()
            .is_some_and(|id| id != existing.node_id)
    {
        anyhow::bail!(
            "--node-id conflicts with the persisted self node {}; wipe the index to re-identify",
            existing.node_id
        );
    }

    let node_id = args
        .node_id
        .clone()
        .or_else(|| existing.as_ref().map(|n| n.node_id.clone()))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let hostname = match &args.hostname {
        Some(h) => h.clone(),
        None => machine_hostname(),
    };

    registry.upsert(NodeInfo {
        node_id: node_id.clone(),
        hostname,
        address: args.advertise_address.clone(),
        port,
        is_self: true,
        cluster_name: args.cluster.clone(),
        kind: NodeKind::Native,
        public_ip: args.public_ip.clone(),
        overlay_ip: args.overlay_ip.clone(),
        online: true,
        last_seen_ms: None,
    })?;

    info!(node_id, cluster = %args.cluster, "registered self node");

    Ok(())
}

fn machine_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
