use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use common::constants::NODE_KEY_PREFIX;
use common::error::ApiError;
use common::schemas::MetricsSnapshot;
use common::time_utils::utc_now_ms;

use crate::core::node::{NodeInfo, NodeRuntime};
use crate::core::store::KvDb;

fn node_key(node_id: &str) -> String {
    format!("{}:{}", NODE_KEY_PREFIX, node_id)
}

struct Inner {
    nodes: HashMap<String, NodeRuntime>,
    /// Bumped on every mutation so callers can detect change without
    /// diffing node lists themselves.
    version: u64,
}

/// The set of known nodes: self plus peers. Shared read-mostly state; every
/// other component resolves targets through it. Mutations replace whole
/// records and persist them, reads take a cheap snapshot.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
    db: KvDb,
}

impl Registry {
    /// Load persisted node records. Peers come back `online = false` until
    /// the first successful probe; a node that has never answered is
    /// offline, never "unknown".
    pub fn load(db: KvDb) -> anyhow::Result<Self> {
        let mut nodes = HashMap::new();
        for mut info in db.scan_prefix::<NodeInfo>(&format!("{}:", NODE_KEY_PREFIX))? {
            info.online = info.is_self;
            nodes.insert(
                info.node_id.clone(),
                NodeRuntime {
                    info,
                    metrics: None,
                },
            );
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner { nodes, version: 0 })),
            db,
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, ApiError> {
        self.inner
            .read()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire nodes read lock: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, ApiError> {
        self.inner
            .write()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire nodes write lock: {}", e)))
    }

    pub fn list(&self) -> Result<Vec<NodeInfo>, ApiError> {
        let inner = self.read()?;
        let mut nodes: Vec<NodeInfo> = inner.nodes.values().map(|n| n.info.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    pub fn runtimes(&self) -> Result<Vec<NodeRuntime>, ApiError> {
        let inner = self.read()?;
        let mut nodes: Vec<NodeRuntime> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.info.node_id.cmp(&b.info.node_id));
        Ok(nodes)
    }

    /// Current registry version together with the node list, taken under a
    /// single read lock.
    pub fn snapshot(&self) -> Result<(u64, Vec<NodeInfo>), ApiError> {
        let inner = self.read()?;
        let mut nodes: Vec<NodeInfo> = inner.nodes.values().map(|n| n.info.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok((inner.version, nodes))
    }

    pub fn get(&self, node_id: &str) -> Result<Option<NodeInfo>, ApiError> {
        Ok(self.read()?.nodes.get(node_id).map(|n| n.info.clone()))
    }

    pub fn self_node(&self) -> Result<NodeInfo, ApiError> {
        self.read()?
            .nodes
            .values()
            .find(|n| n.info.is_self)
            .map(|n| n.info.clone())
            .ok_or_else(|| ApiError::Any(anyhow!("registry has no self node")))
    }

    /// Nodes grouped under `cluster_name`, self included.
    pub fn cluster_nodes(&self, cluster_name: &str) -> Result<Vec<NodeInfo>, ApiError> {
        let inner = self.read()?;
        let mut nodes: Vec<NodeInfo> = inner
            .nodes
            .values()
            .filter(|n| n.info.cluster_name == cluster_name)
            .map(|n| n.info.clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    /// Every node sharing the self node's cluster, excluding self. This is
    /// the mount replication target set.
    pub fn peers_of_self(&self) -> Result<Vec<NodeInfo>, ApiError> {
        let own = self.self_node()?;
        Ok(self
            .cluster_nodes(&own.cluster_name)?
            .into_iter()
            .filter(|n| !n.is_self)
            .collect())
    }

    /// Add or update a node's static fields. An update keeps the stored
    /// `is_self`, `online` and last-seen state: those are owned by startup
    /// and the refresh loop respectively, and an upsert must never flip
    /// them behind their backs.
    pub fn upsert(&self, mut info: NodeInfo) -> Result<NodeInfo, ApiError> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.nodes.get(&info.node_id) {
            info.is_self = existing.info.is_self;
            info.online = existing.info.online;
            info.last_seen_ms = existing.info.last_seen_ms;
        }
        self.db
            .put(&node_key(&info.node_id), &info)
            .map_err(ApiError::Any)?;
        let metrics = inner
            .nodes
            .get(&info.node_id)
            .and_then(|n| n.metrics.clone());
        inner.nodes.insert(
            info.node_id.clone(),
            NodeRuntime {
                info: info.clone(),
                metrics,
            },
        );
        inner.version += 1;
        Ok(info)
    }

    /// Remove a node. Unknown ids are a `NodeNotFound`; the self node can
    /// never be removed through the registry.
    pub fn remove(&self, node_id: &str) -> Result<(), ApiError> {
        let mut inner = self.write()?;
        match inner.nodes.get(node_id) {
            None => return Err(ApiError::NodeNotFound),
            Some(n) if n.info.is_self => {
                return Err(ApiError::Conflict(
                    "cannot remove the local node from its own registry".into(),
                ));
            }
            Some(_) => {}
        }
        self.db.delete(&node_key(node_id)).map_err(ApiError::Any)?;
        inner.nodes.remove(node_id);
        inner.version += 1;
        Ok(())
    }

    /// Install the result of a liveness probe, replacing the whole record.
    /// A node removed while its probe was in flight is simply skipped.
    pub fn apply_probe(
        &self,
        node_id: &str,
        alive: bool,
        metrics: Option<MetricsSnapshot>,
    ) -> Result<(), ApiError> {
        let mut inner = self.write()?;
        let Some(existing) = inner.nodes.get(node_id) else {
            return Ok(());
        };

        let mut info = existing.info.clone();
        info.online = alive;
        if alive {
            info.last_seen_ms = Some(utc_now_ms());
        }
        let metrics = if alive {
            metrics
        } else {
            existing.metrics.clone()
        };

        // persist only on status transitions; last-seen churn from steady
        // probes stays in memory
        if existing.info.online != alive {
            self.db
                .put(&node_key(node_id), &info)
                .map_err(ApiError::Any)?;
        }
        inner
            .nodes
            .insert(node_id.to_string(), NodeRuntime { info, metrics });
        inner.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::constants::DEFAULT_CLUSTER;
    use common::schemas::NodeKind;
    use tempfile::TempDir;

    fn node(id: &str, cluster: &str, is_self: bool) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            hostname: id.to_string(),
            address: "127.0.0.1".to_string(),
            port: 7070,
            is_self,
            cluster_name: cluster.to_string(),
            kind: NodeKind::Native,
            public_ip: None,
            overlay_ip: None,
            online: is_self,
            last_seen_ms: None,
        }
    }

    fn registry() -> (Registry, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = KvDb::open(dir.path()).unwrap();
        (Registry::load(db).unwrap(), dir)
    }

    #[test]
    fn upsert_never_flips_is_self() {
        let (reg, _dir) = registry();
        reg.upsert(node("a", DEFAULT_CLUSTER, true)).unwrap();

        let mut update = node("a", DEFAULT_CLUSTER, false);
        update.hostname = "renamed".to_string();
        reg.upsert(update).unwrap();

        let stored = reg.get("a").unwrap().unwrap();
        assert!(stored.is_self);
        assert_eq!(stored.hostname, "renamed");
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let (reg, _dir) = registry();
        assert!(matches!(reg.remove("ghost"), Err(ApiError::NodeNotFound)));
    }

    #[test]
    fn remove_self_is_rejected() {
        let (reg, _dir) = registry();
        reg.upsert(node("a", DEFAULT_CLUSTER, true)).unwrap();
        assert!(matches!(reg.remove("a"), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn cluster_grouping_and_peers() {
        let (reg, _dir) = registry();
        reg.upsert(node("a", DEFAULT_CLUSTER, true)).unwrap();
        reg.upsert(node("b", DEFAULT_CLUSTER, false)).unwrap();
        reg.upsert(node("c", "edge", false)).unwrap();

        let peers = reg.peers_of_self().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id, "b");
        assert_eq!(reg.cluster_nodes("edge").unwrap().len(), 1);
    }

    #[test]
    fn snapshot_version_bumps_on_mutation() {
        let (reg, _dir) = registry();
        let (v0, _) = reg.snapshot().unwrap();
        reg.upsert(node("a", DEFAULT_CLUSTER, true)).unwrap();
        let (v1, nodes) = reg.snapshot().unwrap();
        assert!(v1 > v0);
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn probe_marks_online_and_last_seen() {
        let (reg, _dir) = registry();
        reg.upsert(node("b", DEFAULT_CLUSTER, false)).unwrap();
        assert!(!reg.get("b").unwrap().unwrap().online);

        reg.apply_probe("b", true, None).unwrap();
        let info = reg.get("b").unwrap().unwrap();
        assert!(info.online);
        assert!(info.last_seen_ms.is_some());

        reg.apply_probe("b", false, None).unwrap();
        let info = reg.get("b").unwrap().unwrap();
        assert!(!info.online);
        // last success is retained for "last seen ago" reporting
        assert!(info.last_seen_ms.is_some());
    }

    #[test]
    fn steady_probes_do_not_rewrite_the_stored_record() {
        let dir = TempDir::new().unwrap();
        let db = KvDb::open(dir.path()).unwrap();
        let reg = Registry::load(db.clone()).unwrap();
        reg.upsert(node("b", DEFAULT_CLUSTER, false)).unwrap();

        reg.apply_probe("b", true, None).unwrap();
        let stored: NodeInfo = db.get("node:b").unwrap().unwrap();
        assert!(stored.online);
        let first_seen = stored.last_seen_ms;
        assert!(first_seen.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        reg.apply_probe("b", true, None).unwrap();

        // in-memory last-seen moved on, the stored record did not
        let stored: NodeInfo = db.get("node:b").unwrap().unwrap();
        assert_eq!(stored.last_seen_ms, first_seen);
        let live = reg.get("b").unwrap().unwrap();
        assert!(live.last_seen_ms > first_seen);

        reg.apply_probe("b", false, None).unwrap();
        let stored: NodeInfo = db.get("node:b").unwrap().unwrap();
        assert!(!stored.online);
    }
}
