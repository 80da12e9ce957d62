use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use common::error::ApiError;
use common::schemas::{ImportRequest, ImportResponse, ReceiveResponse, TokenResponse, WorkloadKind};
use common::url_utils::sanitize_url;

use crate::core::migrate::{
    self, MigrationDestination, MigrationJob, MigrationRequest, PendingTransfer,
};
use crate::core::state::ControlState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// POST /migrations
/// Validate the request, register the job and kick off the orchestrator in
/// the background. The response is the job snapshot; progress is polled via
/// `GET /migrations/{id}`.
#[tracing::instrument(name = "fleet.start_migration", skip(ctx, req), fields(workload = %req.workload_id))]
pub async fn start_migration(
    State(ctx): State<ControlState>,
    Json(req): Json<MigrationRequest>,
) -> Result<(StatusCode, Json<MigrationJob>), ApiError> {
    if req.workload_id.trim().is_empty() {
        return Err(ApiError::Validation("workload_id is required".into()));
    }

    match &req.destination {
        MigrationDestination::Peer { node_id } => {
            let node = ctx.registry.get(node_id)?.ok_or(ApiError::NodeNotFound)?;
            if node.is_self {
                return Err(ApiError::Validation(
                    "destination node is the source node".into(),
                ));
            }
        }
        MigrationDestination::External { url, token } => {
            sanitize_url(url).map_err(|e| ApiError::Validation(e.to_string()))?;
            if token.is_empty() {
                return Err(ApiError::Validation(
                    "external destination requires a transfer token".into(),
                ));
            }
        }
    }

    let source = ctx.registry.self_node()?.node_id;
    let job = ctx.migrations.start(&req, source)?;

    tokio::spawn(migrate::run(ctx.clone(), job.job_id.clone()));

    Ok((StatusCode::ACCEPTED, Json(job)))
}

// GET /migrations/{id}
#[tracing::instrument(name = "fleet.get_migration", skip(ctx))]
pub async fn get_migration(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<Json<MigrationJob>, ApiError> {
    ctx.migrations.get(&id)?.map(Json).ok_or(ApiError::JobNotFound)
}

// POST /migrations/token
/// Issue a one-time transfer token. The caller hands it to a source node,
/// which spends it delivering the archive.
#[tracing::instrument(name = "fleet.issue_token", skip(ctx))]
pub async fn issue_token(
    State(ctx): State<ControlState>,
) -> Result<Json<TokenResponse>, ApiError> {
    Ok(Json(ctx.tokens.issue()?))
}

#[derive(Debug, Deserialize)]
pub struct ReceiveParams {
    pub kind: WorkloadKind,
}

// POST /internal/migrations/receive
/// Destination-side landing zone for an archive. The transfer token is
/// consumed here; the response carries a fresh credential bound to this one
/// transfer, which is what the import call presents.
#[tracing::instrument(name = "fleet.receive_transfer", skip(ctx, headers, body))]
pub async fn receive_transfer(
    State(ctx): State<ControlState>,
    Query(params): Query<ReceiveParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReceiveResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::InvalidToken)?;
    if !ctx.tokens.consume(token)? {
        return Err(ApiError::InvalidToken);
    }

    if body.is_empty() {
        return Err(ApiError::Validation("empty archive".into()));
    }

    let transfer_id = Uuid::new_v4().to_string();
    let import_token = Uuid::new_v4().to_string();
    let archive = ctx.scratch_dir.join(format!("incoming-{}.tar", transfer_id));
    tokio::fs::write(&archive, &body).await?;

    let size = body.len() as u64;
    ctx.transfers.insert(
        transfer_id.clone(),
        PendingTransfer {
            kind: params.kind,
            archive,
            import_token: import_token.clone(),
        },
    )?;

    Ok(Json(ReceiveResponse {
        transfer_id,
        size,
        import_token,
    }))
}

// POST /internal/migrations/import
/// Materialize a previously received archive. The credential is good for
/// one take of one transfer, so a replayed import fails.
#[tracing::instrument(name = "fleet.import_transfer", skip(ctx, headers, req), fields(transfer_id = %req.transfer_id))]
pub async fn import_transfer(
    State(ctx): State<ControlState>,
    headers: HeaderMap,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::InvalidToken)?;
    let pending = ctx.transfers.take_authorized(&req.transfer_id, token)?;

    let workload_id = ctx
        .runtime
        .import(pending.kind, &pending.archive)
        .await
        .map_err(ApiError::Any)?;

    if let Err(e) = tokio::fs::remove_file(&pending.archive).await {
        warn!(archive = %pending.archive.display(), "leaving imported archive behind: {}", e);
    }

    Ok(Json(ImportResponse { workload_id }))
}
