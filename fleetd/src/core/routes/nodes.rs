use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use common::constants::DEFAULT_CLUSTER;
use common::error::ApiError;
use common::schemas::{AddNodeRequest, HealthzResponse, NodeKind, NodeView};

use crate::core::node::NodeInfo;
use crate::core::ops::local_metrics;
use crate::core::state::ControlState;

// GET /healthz
/// Liveness endpoint consumed by peers' registry refresh and by the
/// diagnostics fan-out.
pub async fn healthz(State(ctx): State<ControlState>) -> Result<Json<HealthzResponse>, ApiError> {
    let own = ctx.registry.self_node()?;
    Ok(Json(HealthzResponse {
        node_id: own.node_id,
        version: ctx.version.clone(),
        metrics: local_metrics(ctx.runtime.as_ref()).await,
    }))
}

// GET /nodes
#[tracing::instrument(name = "fleet.list_nodes", skip(ctx))]
pub async fn list_nodes(State(ctx): State<ControlState>) -> Result<Json<Vec<NodeView>>, ApiError> {
    let views = ctx
        .registry
        .runtimes()?
        .iter()
        .map(|n| n.view())
        .collect::<Vec<_>>();
    Ok(Json(views))
}

// POST /nodes
#[tracing::instrument(name = "fleet.add_node", skip(ctx, req), fields(hostname = %req.hostname, address = %req.address))]
pub async fn add_node(
    State(ctx): State<ControlState>,
    Json(req): Json<AddNodeRequest>,
) -> Result<(StatusCode, Json<NodeInfo>), ApiError> {
    if req.hostname.trim().is_empty() {
        return Err(ApiError::Validation("hostname is required".into()));
    }
    if req.address.trim().is_empty() {
        return Err(ApiError::Validation("address is required".into()));
    }
    if req.port == 0 {
        return Err(ApiError::Validation("port is required".into()));
    }

    let info = NodeInfo {
        node_id: req.node_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        hostname: req.hostname,
        address: req.address,
        port: req.port,
        is_self: false,
        cluster_name: req
            .cluster_name
            .unwrap_or_else(|| DEFAULT_CLUSTER.to_string()),
        kind: req.kind.unwrap_or(NodeKind::Native),
        public_ip: req.public_ip,
        overlay_ip: req.overlay_ip,
        online: false,
        last_seen_ms: None,
    };

    let stored = ctx.registry.upsert(info)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

// DELETE /nodes/{node_id}
#[tracing::instrument(name = "fleet.remove_node", skip(ctx))]
pub async fn remove_node(
    Path(node_id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<StatusCode, ApiError> {
    ctx.registry.remove(&node_id)?;
    Ok(StatusCode::NO_CONTENT)
}
