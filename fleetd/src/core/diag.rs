use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use common::schemas::{DiagnosticsSummary, NodeDiagnostics};

use crate::core::node::NodeInfo;
use crate::core::ops::{OverlayNet, Pinger};

/// Probe every target concurrently and reduce into one report. The
/// aggregate completes once each probe has succeeded, failed or hit the
/// per-probe timeout — one unreachable node costs one timeout, not N.
/// Nothing here is persisted; every request computes a fresh report.
pub async fn fan_out(
    pinger: Arc<dyn Pinger>,
    overlay: Arc<dyn OverlayNet>,
    targets: Vec<NodeInfo>,
    probe_timeout: Duration,
) -> DiagnosticsSummary {
    let probes = targets.into_iter().map(|node| {
        let pinger = pinger.clone();
        let overlay = overlay.clone();
        async move { probe_node(pinger, overlay, node, probe_timeout).await }
    });

    let nodes = join_all(probes).await;

    let reachable = nodes.iter().filter(|n| n.api_reachable).count();
    let unreachable = nodes.len() - reachable;

    DiagnosticsSummary {
        reachable,
        unreachable,
        nodes,
    }
}

async fn probe_node(
    pinger: Arc<dyn Pinger>,
    overlay: Arc<dyn OverlayNet>,
    node: NodeInfo,
    probe_timeout: Duration,
) -> NodeDiagnostics {
    if node.is_self {
        // the local node is trivially reachable; probing it over the
        // network would only measure the loopback
        return NodeDiagnostics {
            node_id: node.node_id,
            api_reachable: true,
            status_code: Some(200),
            latency_ms: Some(0),
            overlay_reachable: node.overlay_ip.is_some(),
            overlay_ip: node.overlay_ip,
            last_seen_ago_secs: Some(0),
        };
    }

    // API and overlay are independent signals, probed in parallel
    let (api, mesh) = tokio::join!(
        pinger.probe(&node, probe_timeout),
        overlay.check(&node, probe_timeout)
    );

    NodeDiagnostics {
        last_seen_ago_secs: node.last_seen_ago_secs(),
        node_id: node.node_id,
        api_reachable: api.alive,
        status_code: api.status_code,
        latency_ms: api.latency_ms,
        overlay_ip: mesh.overlay_ip,
        overlay_reachable: mesh.reachable,
    }
}
