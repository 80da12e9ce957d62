use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::warn;

use common::schemas::{HealthzResponse, MetricsSnapshot, WorkloadKind};
use common::url_utils::node_base_url;

use crate::core::mount::{MountKind, MountStatus, StorageMount};
use crate::core::node::NodeInfo;

/// Result of one liveness probe against a peer's API.
#[derive(Clone, Debug, Default)]
pub struct ProbeOutcome {
    pub alive: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub metrics: Option<MetricsSnapshot>,
}

/// Liveness probe primitive, shared by the registry refresh and the
/// diagnostics fan-out.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn probe(&self, node: &NodeInfo, timeout: Duration) -> ProbeOutcome;
}

pub struct HttpPinger {
    http: reqwest::Client,
}

impl HttpPinger {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPinger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pinger for HttpPinger {
    async fn probe(&self, node: &NodeInfo, timeout: Duration) -> ProbeOutcome {
        let url = format!("{}/healthz", node.base_url());
        let started = Instant::now();

        let resp = match self.http.get(&url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(_) => return ProbeOutcome::default(),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = resp.status();
        let metrics = resp
            .json::<HealthzResponse>()
            .await
            .ok()
            .map(|h| h.metrics);

        ProbeOutcome {
            alive: status.is_success(),
            status_code: Some(status.as_u16()),
            latency_ms: Some(latency_ms),
            metrics,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OverlayReport {
    pub overlay_ip: Option<String>,
    pub reachable: bool,
}

/// Overlay mesh status primitive: does the node have an overlay address,
/// and does that address answer. Independent of the API probe.
#[async_trait]
pub trait OverlayNet: Send + Sync {
    async fn check(&self, node: &NodeInfo, timeout: Duration) -> OverlayReport;
}

pub struct HttpOverlay {
    http: reqwest::Client,
}

impl HttpOverlay {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverlayNet for HttpOverlay {
    async fn check(&self, node: &NodeInfo, timeout: Duration) -> OverlayReport {
        let Some(overlay_ip) = node.overlay_ip.clone() else {
            return OverlayReport::default();
        };

        let url = format!("{}/healthz", node_base_url(&overlay_ip, node.port));
        let reachable = self.http.get(&url).timeout(timeout).send().await.is_ok();

        OverlayReport {
            overlay_ip: Some(overlay_ip),
            reachable,
        }
    }
}

/// Local workload lifecycle primitives used by the migration orchestrator.
/// How a container or VM is actually stopped, archived or materialized is
/// outside the coordination layer; this seam is the boundary.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    async fn stop(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<()>;
    /// Produce a transferable archive; returns its path.
    async fn export(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<PathBuf>;
    /// Materialize a workload from an archive; returns the new workload id.
    async fn import(&self, kind: WorkloadKind, archive: &Path) -> anyhow::Result<String>;
    async fn remove(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<()>;
    async fn running_count(&self) -> anyhow::Result<u32>;
}

/// Shells out to the local container/VM tooling.
pub struct ShellRuntime {
    container_cli: String,
    vm_cli: String,
    scratch_dir: PathBuf,
}

impl ShellRuntime {
    pub fn new(container_cli: String, vm_cli: String, scratch_dir: PathBuf) -> Self {
        Self {
            container_cli,
            vm_cli,
            scratch_dir,
        }
    }

    fn cli(&self, kind: WorkloadKind) -> &str {
        match kind {
            WorkloadKind::Container => &self.container_cli,
            WorkloadKind::VirtualMachine => &self.vm_cli,
        }
    }
}

async fn run_checked(cmd: &mut Command, what: &str) -> anyhow::Result<String> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("spawning {}", what))?;
    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl WorkloadRuntime for ShellRuntime {
    async fn stop(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<()> {
        let cli = self.cli(kind);
        run_checked(
            Command::new(cli).args(["stop", workload_id]),
            &format!("{} stop {}", cli, workload_id),
        )
        .await?;
        Ok(())
    }

    async fn export(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<PathBuf> {
        let archive = self.scratch_dir.join(format!("{}.tar", workload_id));
        let cli = self.cli(kind);
        run_checked(
            Command::new(cli)
                .args(["export", "-o"])
                .arg(&archive)
                .arg(workload_id),
            &format!("{} export {}", cli, workload_id),
        )
        .await?;
        Ok(archive)
    }

    async fn import(&self, kind: WorkloadKind, archive: &Path) -> anyhow::Result<String> {
        let cli = self.cli(kind);
        let stdout = run_checked(
            Command::new(cli).arg("import").arg(archive),
            &format!("{} import", cli),
        )
        .await?;
        if stdout.is_empty() {
            bail!("{} import produced no workload id", cli);
        }
        Ok(stdout)
    }

    async fn remove(&self, kind: WorkloadKind, workload_id: &str) -> anyhow::Result<()> {
        let cli = self.cli(kind);
        run_checked(
            Command::new(cli).args(["rm", workload_id]),
            &format!("{} rm {}", cli, workload_id),
        )
        .await?;
        Ok(())
    }

    async fn running_count(&self) -> anyhow::Result<u32> {
        let stdout = run_checked(
            Command::new(&self.container_cli).args(["ps", "-q"]),
            "listing running workloads",
        )
        .await?;
        Ok(stdout.lines().filter(|l| !l.is_empty()).count() as u32)
    }
}

/// Local mount primitives. Probing is the source of truth for mount status;
/// stored status is never trusted.
#[async_trait]
pub trait Mounter: Send + Sync {
    async fn mount(&self, mount: &StorageMount) -> anyhow::Result<()>;
    async fn unmount(&self, mount: &StorageMount) -> anyhow::Result<()>;
    async fn probe(&self, mount: &StorageMount) -> MountStatus;
}

pub struct SystemMounter;

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(&self, mount: &StorageMount) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&mount.mount_point)
            .await
            .with_context(|| format!("creating mount point {}", mount.mount_point))?;

        let mut cmd = match mount.kind {
            MountKind::ObjectStore => {
                let mut c = Command::new("s3fs");
                c.arg(&mount.source).arg(&mount.mount_point);
                if let Some(endpoint) = &mount.endpoint {
                    c.arg("-o").arg(format!("url={}", endpoint));
                }
                if let (Some(ak), Some(sk)) = (&mount.access_key, &mount.secret_key) {
                    c.env("AWSACCESSKEYID", ak).env("AWSSECRETACCESSKEY", sk);
                }
                c
            }
            MountKind::NetworkFilesystem => {
                let mut c = Command::new("mount");
                c.args(["-t", "nfs"]).arg(&mount.source).arg(&mount.mount_point);
                if let Some(options) = &mount.options {
                    c.arg("-o").arg(options);
                }
                c
            }
            MountKind::LocalDirectory => {
                let mut c = Command::new("mount");
                c.arg("--bind").arg(&mount.source).arg(&mount.mount_point);
                c
            }
            MountKind::DistributedDisk => {
                let mut c = Command::new("mount");
                c.args(["-t", "ceph"]).arg(&mount.source).arg(&mount.mount_point);
                if let Some(options) = &mount.options {
                    c.arg("-o").arg(options);
                }
                c
            }
        };

        run_checked(&mut cmd, &format!("mounting {}", mount.name)).await?;
        Ok(())
    }

    async fn unmount(&self, mount: &StorageMount) -> anyhow::Result<()> {
        run_checked(
            Command::new("umount").arg(&mount.mount_point),
            &format!("unmounting {}", mount.name),
        )
        .await?;
        Ok(())
    }

    async fn probe(&self, mount: &StorageMount) -> MountStatus {
        match tokio::fs::read_to_string("/proc/mounts").await {
            Ok(table) => {
                let mounted = table
                    .lines()
                    .filter_map(|l| l.split_whitespace().nth(1))
                    .any(|mp| mp == mount.mount_point);
                if mounted {
                    MountStatus::Mounted
                } else {
                    MountStatus::Unmounted
                }
            }
            Err(e) => {
                warn!(mount = %mount.name, "mount table unreadable: {}", e);
                MountStatus::Error
            }
        }
    }
}

/// Snapshot of the local machine for `/healthz`. Best-effort: a field that
/// cannot be read reports zero rather than failing the probe response.
pub async fn local_metrics(runtime: &dyn WorkloadRuntime) -> MetricsSnapshot {
    let load1 = tokio::fs::read_to_string("/proc/loadavg")
        .await
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
        .unwrap_or(0.0);

    let uptime_secs = tokio::fs::read_to_string("/proc/uptime")
        .await
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .map(|v| v as u64)
        .unwrap_or(0);

    let (mem_used_bytes, mem_total_bytes) = match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(s) => {
            let field = |name: &str| -> Option<u64> {
                s.lines()
                    .find(|l| l.starts_with(name))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
            };
            let total = field("MemTotal:").unwrap_or(0);
            let available = field("MemAvailable:").unwrap_or(0);
            (total.saturating_sub(available), total)
        }
        Err(_) => (0, 0),
    };

    let running_workloads = match runtime.running_count().await {
        Ok(n) => n,
        Err(e) => {
            warn!("running workload count unavailable: {:#}", e);
            0
        }
    };

    MetricsSnapshot {
        load1,
        mem_used_bytes,
        mem_total_bytes,
        uptime_secs,
        running_workloads,
    }
}

/// Fails fast when the scratch directory cannot be created; everything the
/// migration path does lands there first.
pub async fn init_scratch(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| anyhow!("creating scratch dir {}: {}", dir.display(), e))
}
