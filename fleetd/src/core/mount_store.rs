use anyhow::anyhow;
use axum::http::Method;
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use tracing::{info, warn};

use common::constants::MOUNT_KEY_PREFIX;
use common::error::ApiError;
use common::schemas::SyncResult;

use crate::core::mount::{CreateMountRequest, MountStatus, StorageMount, UpdateMountRequest};
use crate::core::ops::Mounter;
use crate::core::state::ControlState;
use crate::core::store::KvDb;

/// Peer pushes during one sync run concurrently; the bound only matters for
/// very large clusters, a single slow peer still costs one timeout.
const SYNC_CONCURRENCY: usize = 16;

fn mount_key(id: &str) -> String {
    format!("{}:{}", MOUNT_KEY_PREFIX, id)
}

/// Owns the mount definitions of this node. Status is derived by probing
/// the mount point on every read; the stored value is only a last-known
/// hint.
#[derive(Clone)]
pub struct MountManager {
    db: KvDb,
    mounter: Arc<dyn Mounter>,
}

impl MountManager {
    pub fn new(db: KvDb, mounter: Arc<dyn Mounter>) -> Self {
        Self { db, mounter }
    }

    fn load(&self, id: &str) -> Result<StorageMount, ApiError> {
        self.db
            .get::<StorageMount>(&mount_key(id))
            .map_err(ApiError::Any)?
            .ok_or(ApiError::MountNotFound)
    }

    fn persist(&self, mount: &StorageMount) -> Result<(), ApiError> {
        self.db.put(&mount_key(&mount.id), mount).map_err(ApiError::Any)
    }

    /// Load with a fresh status probe.
    pub async fn get(&self, id: &str) -> Result<StorageMount, ApiError> {
        let mut mount = self.load(id)?;
        mount.status = self.mounter.probe(&mount).await;
        Ok(mount)
    }

    /// All definitions, each with a freshly probed status.
    pub async fn list(&self) -> Result<Vec<StorageMount>, ApiError> {
        let mut mounts = self
            .db
            .scan_prefix::<StorageMount>(&format!("{}:", MOUNT_KEY_PREFIX))
            .map_err(ApiError::Any)?;
        mounts.sort_by(|a, b| a.name.cmp(&b.name));

        let probes = mounts.iter().map(|m| self.mounter.probe(m));
        let statuses = futures_util::future::join_all(probes).await;
        for (mount, status) in mounts.iter_mut().zip(statuses) {
            mount.status = status;
        }
        Ok(mounts)
    }

    /// Validate and save a new definition. When `do_mount` is set the mount
    /// is attempted immediately, but a mount failure does not unsave the
    /// definition: an unmountable definition is still valid configuration.
    pub async fn create(&self, req: CreateMountRequest) -> Result<StorageMount, ApiError> {
        let do_mount = req.do_mount;
        let mut mount = StorageMount::from_create(req);
        mount.validate()?;
        self.persist(&mount)?;

        if do_mount {
            match self.mounter.mount(&mount).await {
                Ok(()) => mount.status = MountStatus::Mounted,
                Err(e) => {
                    warn!(mount = %mount.name, "initial mount failed: {:#}", e);
                    mount.status = MountStatus::Error;
                }
            }
            self.persist(&mount)?;
        }

        Ok(mount)
    }

    pub async fn update(&self, id: &str, upd: UpdateMountRequest) -> Result<StorageMount, ApiError> {
        let mut mount = self.load(id)?;
        mount.apply_update(upd);
        mount.validate()?;
        self.persist(&mount)?;
        mount.status = self.mounter.probe(&mount).await;
        Ok(mount)
    }

    /// Idempotent: mounting an already-mounted entry is a no-op success.
    pub async fn mount(&self, id: &str) -> Result<StorageMount, ApiError> {
        let mut mount = self.load(id)?;
        if self.mounter.probe(&mount).await == MountStatus::Mounted {
            mount.status = MountStatus::Mounted;
            return Ok(mount);
        }

        match self.mounter.mount(&mount).await {
            Ok(()) => {
                mount.status = MountStatus::Mounted;
                self.persist(&mount)?;
                Ok(mount)
            }
            Err(e) => {
                mount.status = MountStatus::Error;
                self.persist(&mount)?;
                Err(ApiError::Any(anyhow!("mount {} failed: {:#}", mount.name, e)))
            }
        }
    }

    pub async fn unmount(&self, id: &str) -> Result<StorageMount, ApiError> {
        let mut mount = self.load(id)?;
        if self.mounter.probe(&mount).await == MountStatus::Unmounted {
            mount.status = MountStatus::Unmounted;
            return Ok(mount);
        }

        match self.mounter.unmount(&mount).await {
            Ok(()) => {
                mount.status = MountStatus::Unmounted;
                self.persist(&mount)?;
                Ok(mount)
            }
            Err(e) => {
                mount.status = MountStatus::Error;
                self.persist(&mount)?;
                Err(ApiError::Any(anyhow!(
                    "unmount {} failed: {:#}",
                    mount.name,
                    e
                )))
            }
        }
    }

    /// Unmount-then-delete. A live mount whose unmount fails keeps its
    /// configuration record; abandoning a mounted filesystem with no record
    /// of it is worse than refusing the delete.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mount = self.load(id)?;
        if self.mounter.probe(&mount).await == MountStatus::Mounted {
            self.mounter.unmount(&mount).await.map_err(|e| {
                ApiError::Conflict(format!(
                    "mount {} is busy, unmount failed: {:#}",
                    mount.name, e
                ))
            })?;
        }
        self.db.delete(&mount_key(id)).map_err(ApiError::Any)?;
        info!(mount = %mount.name, "mount definition deleted");
        Ok(())
    }

    /// Peer-side half of replication: upsert the pushed definition by id
    /// and attempt the mount when the definition asks to be mounted on its
    /// nodes.
    pub async fn apply(&self, mut mount: StorageMount) -> Result<StorageMount, ApiError> {
        mount.validate()?;
        self.persist(&mount)?;

        if mount.auto_mount && self.mounter.probe(&mount).await != MountStatus::Mounted {
            match self.mounter.mount(&mount).await {
                Ok(()) => mount.status = MountStatus::Mounted,
                Err(e) => {
                    warn!(mount = %mount.name, "applying replicated mount failed: {:#}", e);
                    mount.status = MountStatus::Error;
                }
            }
            self.persist(&mount)?;
        } else {
            mount.status = self.mounter.probe(&mount).await;
        }

        Ok(mount)
    }
}

/// Push a global mount definition to every other node in the owner's
/// cluster. Replication is not all-or-nothing: the caller gets exactly one
/// result per peer, whatever mix of applied, rejected and unreachable that
/// turns out to be, and nothing is retried.
pub async fn sync_mount(ctx: &ControlState, id: &str) -> Result<Vec<SyncResult>, ApiError> {
    let mount = ctx.mounts.load(id)?;
    if !mount.global {
        return Err(ApiError::Validation(format!(
            "mount {} is not global, nothing to replicate",
            mount.name
        )));
    }

    let peers = ctx.registry.peers_of_self()?;

    let mut results = stream::iter(peers)
        .map(|peer| {
            let proxy = ctx.proxy.clone();
            let mount = mount.clone();
            async move {
                // the full definition travels, secrets included: the peer
                // has to be able to mount with it
                match proxy
                    .forward_json(&peer.node_id, Method::POST, "/mounts/apply", &mount, None)
                    .await
                {
                    Ok(relayed) if relayed.status.is_success() => SyncResult {
                        node_id: peer.node_id,
                        ok: true,
                        detail: "applied".to_string(),
                    },
                    Ok(relayed) => SyncResult {
                        node_id: peer.node_id,
                        ok: false,
                        detail: format!(
                            "peer returned {}: {}",
                            relayed.status,
                            String::from_utf8_lossy(&relayed.body)
                        ),
                    },
                    Err(e) => SyncResult {
                        node_id: peer.node_id,
                        ok: false,
                        detail: e.to_string(),
                    },
                }
            }
        })
        .buffer_unordered(SYNC_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    results.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        warn!(mount = %mount.name, failed, total = results.len(), "mount sync completed with failures");
    } else {
        info!(mount = %mount.name, total = results.len(), "mount sync completed");
    }

    Ok(results)
}
