use axum::extract::{Json, State};

use common::error::ApiError;
use common::schemas::{DiagnosticsRequest, DiagnosticsSummary};

use crate::core::diag;
use crate::core::node::NodeInfo;
use crate::core::state::ControlState;

// POST /diagnostics
/// Probe the requested nodes concurrently and report fresh reachability.
/// Explicit ids win over a cluster filter; with neither, every registered
/// node is probed.
#[tracing::instrument(name = "fleet.diagnostics", skip(ctx, req))]
pub async fn run_diagnostics(
    State(ctx): State<ControlState>,
    Json(req): Json<DiagnosticsRequest>,
) -> Result<Json<DiagnosticsSummary>, ApiError> {
    let targets: Vec<NodeInfo> = if let Some(ids) = &req.nodes {
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            targets.push(ctx.registry.get(id)?.ok_or(ApiError::NodeNotFound)?);
        }
        targets
    } else if let Some(cluster) = &req.cluster {
        ctx.registry.cluster_nodes(cluster)?
    } else {
        ctx.registry.list()?
    };

    let summary = diag::fan_out(
        ctx.pinger.clone(),
        ctx.overlay.clone(),
        targets,
        ctx.probe_timeout,
    )
    .await;

    Ok(Json(summary))
}
