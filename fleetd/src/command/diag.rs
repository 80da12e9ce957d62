use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use common::constants::NODE_KEY_PREFIX;

use crate::core::diag::fan_out;
use crate::core::node::NodeInfo;
use crate::core::ops::{HttpOverlay, HttpPinger};
use crate::core::store::KvDb;

#[derive(Parser, Debug, Clone)]
pub struct DiagArgs {
    /// RocksDB directory of the local daemon
    #[arg(long, default_value = "./data/index")]
    pub index: PathBuf,

    /// Restrict the report to one cluster
    #[arg(long)]
    pub cluster: Option<String>,

    /// Per-probe timeout (seconds)
    #[arg(long, default_value_t = 3)]
    pub probe_timeout_secs: u64,
}

/// Offline diagnostics: read the node records straight from the index and
/// probe them, without requiring the daemon to be running.
pub async fn diag(diag_args: DiagArgs) -> anyhow::Result<()> {
    let db = KvDb::open(&diag_args.index)?;

    let mut targets = db
        .scan_prefix::<NodeInfo>(&format!("{}:", NODE_KEY_PREFIX))?
        .into_iter()
        // the daemon is not necessarily up, so probe self like any peer
        .map(|mut n| {
            n.is_self = false;
            n
        })
        .filter(|n| {
            diag_args
                .cluster
                .as_deref()
                .is_none_or(|c| n.cluster_name == c)
        })
        .collect::<Vec<_>>();
    targets.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    if targets.is_empty() {
        info!("no matching node records in {}", diag_args.index.display());
        return Ok(());
    }

    let summary = fan_out(
        Arc::new(HttpPinger::new()),
        Arc::new(HttpOverlay::new()),
        targets,
        Duration::from_secs(diag_args.probe_timeout_secs),
    )
    .await;

    info!("{}", summary);

    Ok(())
}
