use futures_util::{StreamExt, stream};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use common::error::ApiError;

use crate::core::state::ControlState;

const REFRESH_CONCURRENCY: usize = 16;

/// The one persistent background task: periodically probe every peer and
/// install fresh `online`/metrics records in the registry. Everything else
/// in the daemon is request-driven.
pub async fn registry_refresh_loop(
    state: ControlState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }

        if let Err(e) = refresh_once(&state).await {
            warn!("registry refresh cycle failed: {}", e);
        }
    }

    info!("registry refresh loop stopped");

    Ok(())
}

/// One refresh cycle. Probes run concurrently with the per-probe timeout,
/// and each result replaces the node's record wholesale, so readers under
/// the same registry never see a half-updated node.
pub async fn refresh_once(state: &ControlState) -> Result<(), ApiError> {
    let nodes = state.registry.list()?;

    let outcomes = stream::iter(nodes)
        .map(|node| {
            let pinger = state.pinger.clone();
            let timeout = state.probe_timeout;
            async move {
                if node.is_self {
                    // the local node answers itself; no probe
                    return (node, true, None);
                }
                let outcome = pinger.probe(&node, timeout).await;
                (node, outcome.alive, outcome.metrics)
            }
        })
        .buffer_unordered(REFRESH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    for (node, alive, metrics) in outcomes {
        state.registry.apply_probe(&node.node_id, alive, metrics)?;
    }

    Ok(())
}
