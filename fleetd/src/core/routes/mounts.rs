use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};

use common::error::ApiError;
use common::schemas::SyncResult;

use crate::core::mount::{CreateMountRequest, StorageMount, UpdateMountRequest};
use crate::core::mount_store::sync_mount;
use crate::core::state::ControlState;

// Secrets never leave through a response: every handler here answers with
// the redacted form, whatever the stored definition holds.

// GET /mounts
#[tracing::instrument(name = "fleet.list_mounts", skip(ctx))]
pub async fn list_mounts(
    State(ctx): State<ControlState>,
) -> Result<Json<Vec<StorageMount>>, ApiError> {
    let mounts = ctx
        .mounts
        .list()
        .await?
        .into_iter()
        .map(|m| m.redacted())
        .collect();
    Ok(Json(mounts))
}

// POST /mounts
#[tracing::instrument(name = "fleet.create_mount", skip(ctx, req), fields(name = %req.name))]
pub async fn create_mount(
    State(ctx): State<ControlState>,
    Json(req): Json<CreateMountRequest>,
) -> Result<(StatusCode, Json<StorageMount>), ApiError> {
    let mount = ctx.mounts.create(req).await?;
    Ok((StatusCode::CREATED, Json(mount.redacted())))
}

// PUT /mounts/{id}
#[tracing::instrument(name = "fleet.update_mount", skip(ctx, upd))]
pub async fn update_mount(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
    Json(upd): Json<UpdateMountRequest>,
) -> Result<Json<StorageMount>, ApiError> {
    let mount = ctx.mounts.update(&id, upd).await?;
    Ok(Json(mount.redacted()))
}

// DELETE /mounts/{id}
#[tracing::instrument(name = "fleet.delete_mount", skip(ctx))]
pub async fn delete_mount(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<StatusCode, ApiError> {
    ctx.mounts.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /mounts/{id}/mount
#[tracing::instrument(name = "fleet.mount", skip(ctx))]
pub async fn mount_one(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<Json<StorageMount>, ApiError> {
    let mount = ctx.mounts.mount(&id).await?;
    Ok(Json(mount.redacted()))
}

// POST /mounts/{id}/unmount
#[tracing::instrument(name = "fleet.unmount", skip(ctx))]
pub async fn unmount_one(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<Json<StorageMount>, ApiError> {
    let mount = ctx.mounts.unmount(&id).await?;
    Ok(Json(mount.redacted()))
}

// POST /mounts/{id}/sync
#[tracing::instrument(name = "fleet.sync_mount", skip(ctx))]
pub async fn sync_one(
    Path(id): Path<String>,
    State(ctx): State<ControlState>,
) -> Result<Json<Vec<SyncResult>>, ApiError> {
    let results = sync_mount(&ctx, &id).await?;
    Ok(Json(results))
}

// POST /mounts/apply
/// Peer-side target of a sync push. Takes the full unredacted definition
/// from the owning node.
#[tracing::instrument(name = "fleet.apply_mount", skip(ctx, mount), fields(name = %mount.name))]
pub async fn apply_mount(
    State(ctx): State<ControlState>,
    Json(mount): Json<StorageMount>,
) -> Result<Json<StorageMount>, ApiError> {
    let mount = ctx.mounts.apply(mount).await?;
    Ok(Json(mount.redacted()))
}
