use serde::{Deserialize, Serialize};

/// Provenance of a managed node: a plain server running this daemon, or a
/// hypervisor-managed machine imported from an external inventory.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Native,
    Hypervisor,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub load1: f32,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub uptime_secs: u64,
    pub running_workloads: u32,
}

/// Payload of `GET /healthz`, consumed by peers' registry refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthzResponse {
    pub node_id: String,
    pub version: Option<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub node_id: Option<String>,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub cluster_name: Option<String>,
    pub kind: Option<NodeKind>,
    pub public_ip: Option<String>,
    pub overlay_ip: Option<String>,
}

/// One row of the node listing: registry fields plus whatever the last
/// refresh learned about the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub is_self: bool,
    pub cluster_name: String,
    pub kind: NodeKind,
    pub public_ip: Option<String>,
    pub online: bool,
    pub running_workloads: Option<u32>,
    pub last_seen_ago_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Container,
    VirtualMachine,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Container => write!(f, "container"),
            WorkloadKind::VirtualMachine => write!(f, "virtual_machine"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub transfer_id: String,
    pub size: u64,
    /// One-time credential for importing exactly this transfer. The
    /// transfer token itself is spent by the receive call.
    pub import_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    pub transfer_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    pub workload_id: String,
}

/// Mount replication outcome for a single peer. A sync over a cluster
/// returns one of these per peer; mixed results are a normal completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResult {
    pub node_id: String,
    pub ok: bool,
    pub detail: String,
}

/// Diagnostics target selection: explicit node ids, a whole cluster, or
/// (when both are absent) every node in the registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiagnosticsRequest {
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub cluster: Option<String>,
}

/// Three independent reachability signals for one node. They are reported
/// separately: "API down but overlay up" and its inverse are both actionable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDiagnostics {
    pub node_id: String,
    pub api_reachable: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub overlay_ip: Option<String>,
    pub overlay_reachable: bool,
    pub last_seen_ago_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub reachable: usize,
    pub unreachable: usize,
    pub nodes: Vec<NodeDiagnostics>,
}

impl std::fmt::Display for DiagnosticsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Diagnostics: {} reachable, {} unreachable",
            self.reachable, self.unreachable
        )?;
        for n in &self.nodes {
            writeln!(
                f,
                "  {:<24} api={:<5} status={:<4} latency={:<6} overlay_ip={:<16} overlay={:<5} last_seen_ago={}",
                n.node_id,
                n.api_reachable,
                n.status_code.map_or_else(|| "-".into(), |s| s.to_string()),
                n.latency_ms
                    .map_or_else(|| "-".into(), |l| format!("{l}ms")),
                n.overlay_ip.as_deref().unwrap_or("-"),
                n.overlay_reachable,
                n.last_seen_ago_secs
                    .map_or_else(|| "never".into(), |s| format!("{s}s")),
            )?;
        }
        Ok(())
    }
}
