#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use axum_server::{Handle, Server};
use reqwest::Client;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::schemas::{NodeKind, WorkloadKind};

use fleetd::core::mount::{MountStatus, StorageMount};
use fleetd::core::node::NodeInfo;
use fleetd::core::ops::{HttpOverlay, HttpPinger, Mounter, WorkloadRuntime};
use fleetd::core::registry::Registry;
use fleetd::core::routes::router;
use fleetd::core::state::{ControlState, ControlStateConfig};
use fleetd::core::store::KvDb;

/// Workload runtime double: records every lifecycle call and can be told to
/// fail any single operation, so tests can pin a migration to a phase.
#[derive(Default)]
pub struct FakeRuntime {
    pub scratch: Mutex<Option<PathBuf>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub imported: Mutex<Vec<String>>,
    pub imported_sizes: Mutex<Vec<usize>>,
    pub fail_stop: AtomicBool,
    pub fail_export: AtomicBool,
    pub fail_import: AtomicBool,
    /// When non-zero, exported archives are this many bytes instead of the
    /// tiny default.
    pub export_bytes: AtomicU32,
    import_seq: AtomicU32,
}

impl FakeRuntime {
    fn scratch_dir(&self) -> PathBuf {
        self.scratch
            .lock()
            .unwrap()
            .clone()
            .expect("scratch dir not set")
    }
}

#[async_trait]
impl WorkloadRuntime for FakeRuntime {
    async fn stop(&self, _kind: WorkloadKind, workload_id: &str) -> Result<()> {
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("stop refused");
        }
        self.stopped.lock().unwrap().push(workload_id.to_string());
        Ok(())
    }

    async fn export(&self, _kind: WorkloadKind, workload_id: &str) -> Result<PathBuf> {
        if self.fail_export.load(Ordering::SeqCst) {
            anyhow::bail!("export refused");
        }
        let archive = self.scratch_dir().join(format!("{}.tar", workload_id));
        let size = self.export_bytes.load(Ordering::SeqCst) as usize;
        if size > 0 {
            tokio::fs::write(&archive, vec![0x5a; size]).await?;
        } else {
            tokio::fs::write(&archive, format!("archive of {}", workload_id)).await?;
        }
        Ok(archive)
    }

    async fn import(&self, _kind: WorkloadKind, archive: &std::path::Path) -> Result<String> {
        if self.fail_import.load(Ordering::SeqCst) {
            anyhow::bail!("import refused");
        }
        let data = tokio::fs::read(archive).await?;
        self.imported_sizes.lock().unwrap().push(data.len());
        let n = self.import_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("restored-{}", n);
        self.imported.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn remove(&self, _kind: WorkloadKind, workload_id: &str) -> Result<()> {
        self.removed.lock().unwrap().push(workload_id.to_string());
        Ok(())
    }

    async fn running_count(&self) -> Result<u32> {
        Ok(self.imported.lock().unwrap().len() as u32)
    }
}

/// Mounter double keyed on mount points; no real filesystems involved.
#[derive(Default)]
pub struct FakeMounter {
    pub mounted: Mutex<HashSet<String>>,
    pub mount_calls: Mutex<Vec<String>>,
    pub fail_mount: AtomicBool,
    pub fail_unmount: AtomicBool,
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn mount(&self, mount: &StorageMount) -> Result<()> {
        self.mount_calls.lock().unwrap().push(mount.id.clone());
        if self.fail_mount.load(Ordering::SeqCst) {
            anyhow::bail!("mount refused");
        }
        self.mounted.lock().unwrap().insert(mount.mount_point.clone());
        Ok(())
    }

    async fn unmount(&self, mount: &StorageMount) -> Result<()> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            anyhow::bail!("unmount refused");
        }
        self.mounted.lock().unwrap().remove(&mount.mount_point);
        Ok(())
    }

    async fn probe(&self, mount: &StorageMount) -> MountStatus {
        if self.mounted.lock().unwrap().contains(&mount.mount_point) {
            MountStatus::Mounted
        } else {
            MountStatus::Unmounted
        }
    }
}

/// One full daemon on an ephemeral port, backed by a throwaway index. The
/// registry refresh loop is not started; tests drive refresh explicitly when
/// they need it, so node liveness never flaps mid-assertion.
pub struct TestNode {
    pub node_id: String,
    pub state: ControlState,
    pub addr: SocketAddr,
    pub url: String,
    pub runtime: Arc<FakeRuntime>,
    pub mounter: Arc<FakeMounter>,
    pub data_dir: TempDir,
    handle: JoinHandle<Result<()>>,
    server_handle: Handle,
    shutdown_tx: watch::Sender<bool>,
}

impl TestNode {
    pub async fn new(node_id: &str, cluster: &str) -> Result<Self> {
        let data_dir = TempDir::new()?;
        let scratch = data_dir.path().join("scratch");
        tokio::fs::create_dir_all(&scratch).await?;

        let db = KvDb::open(&data_dir.path().join("index"))?;
        let registry = Registry::load(db.clone())?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        registry.upsert(NodeInfo {
            node_id: node_id.to_string(),
            hostname: node_id.to_string(),
            address: "127.0.0.1".to_string(),
            port: addr.port(),
            is_self: true,
            cluster_name: cluster.to_string(),
            kind: NodeKind::Native,
            public_ip: None,
            overlay_ip: None,
            online: true,
            last_seen_ms: None,
        })?;

        let runtime = Arc::new(FakeRuntime::default());
        *runtime.scratch.lock().unwrap() = Some(scratch.clone());
        let mounter = Arc::new(FakeMounter::default());

        let state = ControlState::new(ControlStateConfig {
            db,
            registry,
            runtime: runtime.clone(),
            mounter: mounter.clone(),
            pinger: Arc::new(HttpPinger::new()),
            overlay: Arc::new(HttpOverlay::new()),
            proxy_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
            scratch_dir: scratch,
            token_ttl: Duration::from_secs(60),
            version: Some("test".to_string()),
        });

        let app = router(state.clone());
        state.set_local_router(app.clone());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server_handle = Handle::new();
        let task_handle = server_handle.clone();
        let handle = tokio::spawn(async move {
            let server = Server::from_tcp(listener.into_std()?)
                .handle(task_handle)
                .serve(app.into_make_service());
            tokio::select! {
                res = server => res.map_err(anyhow::Error::from),
                _ = shutdown_rx.changed() => Ok(()),
            }
        });

        Ok(Self {
            node_id: node_id.to_string(),
            state,
            addr,
            url: format!("http://{}", addr),
            runtime,
            mounter,
            data_dir,
            handle,
            server_handle,
            shutdown_tx,
        })
    }

    /// Register `other` as a peer in this node's registry, over the API.
    pub async fn register_peer(&self, client: &Client, other: &TestNode) -> Result<()> {
        let own = other.state.registry.self_node().map_err(anyhow::Error::from)?;
        self.register_raw(client, &own.node_id, &own.cluster_name, own.port)
            .await
    }

    /// Register an arbitrary 127.0.0.1 peer; useful for dead ports.
    pub async fn register_raw(
        &self,
        client: &Client,
        node_id: &str,
        cluster: &str,
        port: u16,
    ) -> Result<()> {
        let resp = client
            .post(format!("{}/nodes", self.url))
            .json(&serde_json::json!({
                "node_id": node_id,
                "hostname": node_id,
                "address": "127.0.0.1",
                "port": port,
                "cluster_name": cluster,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("register_peer failed: {}", resp.status());
        }
        Ok(())
    }

    pub async fn shutdown(self) -> Result<()> {
        // close listener and every open connection, not just the accept loop;
        // otherwise pooled keep-alive connections outlive the node
        self.server_handle.shutdown();
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
        Ok(())
    }
}

/// Grab a port that nothing listens on by binding and dropping a listener.
pub async fn dead_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub async fn wait_until<F>(cond: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Poll a migration job until it leaves the running state, returning its
/// final JSON form.
pub async fn wait_for_job(
    client: &Client,
    node_url: &str,
    job_id: &str,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let deadline = Instant::now() + timeout;
    loop {
        let job: serde_json::Value = client
            .get(format!("{}/migrations/{}", node_url, job_id))
            .send()
            .await?
            .json()
            .await?;
        if job["state"] != "running" {
            return Ok(job);
        }
        if Instant::now() > deadline {
            anyhow::bail!("migration {} still running after {:?}", job_id, timeout);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
