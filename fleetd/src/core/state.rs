use axum::Router;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::core::migrate::{MigrationTracker, TokenStore, TransferStore};
use crate::core::mount_store::MountManager;
use crate::core::ops::{Mounter, OverlayNet, Pinger, WorkloadRuntime};
use crate::core::proxy::Proxy;
use crate::core::registry::Registry;
use crate::core::store::KvDb;

/// Everything a request handler needs. Cheap to clone; all components share
/// state through their own `Arc`s.
#[derive(Clone)]
pub struct ControlState {
    pub http: Client,
    pub db: KvDb,
    pub registry: Registry,
    pub proxy: Proxy,
    pub mounts: MountManager,
    pub migrations: MigrationTracker,
    pub tokens: TokenStore,
    pub transfers: TransferStore,
    pub runtime: Arc<dyn WorkloadRuntime>,
    pub mounter: Arc<dyn Mounter>,
    pub pinger: Arc<dyn Pinger>,
    pub overlay: Arc<dyn OverlayNet>,
    /// Per-probe budget for refresh and diagnostics fan-outs.
    pub probe_timeout: Duration,
    pub scratch_dir: Arc<PathBuf>,
    pub version: Option<String>,
    /// The assembled local router, set once at startup. Lets the proxy
    /// handler dispatch self-addressed requests in-process.
    local: Arc<OnceLock<Router>>,
}

pub struct ControlStateConfig {
    pub db: KvDb,
    pub registry: Registry,
    pub runtime: Arc<dyn WorkloadRuntime>,
    pub mounter: Arc<dyn Mounter>,
    pub pinger: Arc<dyn Pinger>,
    pub overlay: Arc<dyn OverlayNet>,
    pub proxy_timeout: Duration,
    pub probe_timeout: Duration,
    pub scratch_dir: PathBuf,
    pub token_ttl: Duration,
    pub version: Option<String>,
}

impl ControlState {
    pub fn new(cfg: ControlStateConfig) -> Self {
        let proxy = Proxy::new(cfg.registry.clone(), cfg.proxy_timeout);
        let mounts = MountManager::new(cfg.db.clone(), cfg.mounter.clone());
        Self {
            http: Client::new(),
            db: cfg.db,
            registry: cfg.registry,
            proxy,
            mounts,
            migrations: MigrationTracker::new(),
            tokens: TokenStore::new(cfg.token_ttl),
            transfers: TransferStore::new(),
            runtime: cfg.runtime,
            mounter: cfg.mounter,
            pinger: cfg.pinger,
            overlay: cfg.overlay,
            probe_timeout: cfg.probe_timeout,
            scratch_dir: Arc::new(cfg.scratch_dir),
            version: cfg.version,
            local: Arc::new(OnceLock::new()),
        }
    }

    pub fn set_local_router(&self, router: Router) {
        let _ = self.local.set(router);
    }

    pub fn local_router(&self) -> Option<Router> {
        self.local.get().cloned()
    }
}
