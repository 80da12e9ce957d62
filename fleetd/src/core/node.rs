use serde::{Deserialize, Serialize};

use common::schemas::{MetricsSnapshot, NodeKind, NodeView};
use common::time_utils::utc_now_ms;
use common::url_utils::node_base_url;

/// Static registry record for one managed server. `online` and
/// `last_seen_ms` are owned by the background refresh; everything else is
/// operator-supplied. Exactly one record per registry has `is_self = true`,
/// and that flag never changes after the record is created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub node_id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub is_self: bool,
    pub cluster_name: String,
    pub kind: NodeKind,
    pub public_ip: Option<String>,
    /// Address on the private overlay mesh, when the node has joined one.
    pub overlay_ip: Option<String>,
    pub online: bool,
    /// Wall clock of the last successful liveness probe. None = never seen.
    pub last_seen_ms: Option<i128>,
}

impl NodeInfo {
    pub fn base_url(&self) -> String {
        node_base_url(&self.address, self.port)
    }

    pub fn last_seen_ago_secs(&self) -> Option<u64> {
        let seen = self.last_seen_ms?;
        let delta_ms = (utc_now_ms() - seen).max(0);
        Some((delta_ms / 1000) as u64)
    }
}

/// In-memory registry entry: the persisted record plus the metrics snapshot
/// from the last successful probe. Replaced wholesale on refresh so readers
/// never observe a half-updated record.
#[derive(Clone, Debug)]
pub struct NodeRuntime {
    pub info: NodeInfo,
    pub metrics: Option<MetricsSnapshot>,
}

impl NodeRuntime {
    pub fn view(&self) -> NodeView {
        NodeView {
            node_id: self.info.node_id.clone(),
            hostname: self.info.hostname.clone(),
            address: self.info.address.clone(),
            port: self.info.port,
            is_self: self.info.is_self,
            cluster_name: self.info.cluster_name.clone(),
            kind: self.info.kind,
            public_ip: self.info.public_ip.clone(),
            online: self.info.online,
            running_workloads: self.metrics.as_ref().map(|m| m.running_workloads),
            last_seen_ago_secs: self.info.last_seen_ago_secs(),
        }
    }
}
